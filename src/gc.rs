//! Garbage collector (spec §4.4, component D).
//!
//! Grounded in `garbage_collection.c`'s `collectGarbage`: pick the
//! closed area of the requested type with the most dirty pages (ties
//! broken towards the lower erase count, spreading wear), copy its
//! live pages into the garbage buffer, swap the two areas' logical
//! identities so outstanding `Addr`s stay valid, and erase what is now
//! the old victim. A victim with no live pages at all is reclaimed
//! directly, without needing the garbage buffer.
//!
//! [`AreaManager`] and [`SummaryCache`] sit below this module in the
//! dependency order (spec §2 control-flow table: `... -> D -> (B, C)`);
//! `collect_garbage` is the only place that drives both of them
//! together.

use crate::area::{AreaManager, AreaType};
use crate::config::Derived;
use crate::driver::Driver;
use crate::error::Error;
use crate::summary::{SummaryCache, SummaryEntry};
use alloc::vec;
use log::{debug, info, warn};

/// Runs one round of garbage collection for `target`, freeing up at
/// least one area for `AreaManager::find_writable_area(target)` to
/// hand out afterwards. Callers that got `Error::NoSpace` from the
/// area manager are expected to call this and retry (spec §4.2); that
/// retry loop lives in `Device`, not here.
pub fn collect_garbage<D: Driver>(
    target: AreaType,
    areas: &mut AreaManager,
    summary: &mut SummaryCache,
    derived: &Derived,
    driver: &mut D,
) -> Result<(), Error> {
    let candidates: alloc::vec::Vec<_> = areas.closed_areas_of(target).collect();
    if candidates.is_empty() {
        warn!("garbage collection for {} found no closed areas", target);
        return Err(Error::NoSpace);
    }
    for &pos in &candidates {
        if !summary.is_cached(pos) {
            summary.load_area_summary(pos, areas, derived, driver)?;
        }
    }

    let victim = pick_victim(&candidates, areas, summary);
    debug!(
        "garbage collection for {}: victim area {} ({} dirty, {} used)",
        target,
        victim,
        summary.dirty_page_count(victim),
        summary.used_page_count(victim)
    );

    if summary.used_page_count(victim) == 0 {
        reclaim_fully_dirty(victim, areas, summary, derived, driver)?;
        if areas.garbage_buffer().is_none() {
            areas.set_garbage_buffer(Some(victim));
        }
        return Ok(());
    }

    let gb_pos = match areas.garbage_buffer() {
        Some(pos) => pos,
        None => {
            // Desperate mode (spec §4.4 step 2): no garbage buffer to copy
            // into, so only a fully-dirty area can be reclaimed this round.
            let fully_dirty = candidates
                .iter()
                .copied()
                .find(|&pos| summary.used_page_count(pos) == 0);
            return match fully_dirty {
                Some(pos) => {
                    reclaim_fully_dirty(pos, areas, summary, derived, driver)?;
                    areas.set_garbage_buffer(Some(pos));
                    Ok(())
                }
                None => {
                    warn!("garbage collection desperate and no fully-dirty area exists");
                    Err(Error::NoSpace)
                }
            };
        }
    };

    copy_live_pages(victim, gb_pos, target, areas, summary, derived, driver)?;

    areas.swap(victim, gb_pos);
    summary.swap_keys(victim, gb_pos);

    // Post-swap, `victim` resolves to the freshly written data and
    // becomes the new active area; `gb_pos` resolves to the old,
    // now-all-dirty physical slot and is erased to become the next
    // garbage buffer.
    let copied_pages = summary.used_page_count(victim);
    areas.activate(victim, target, copied_pages as u32);

    match erase_area(gb_pos, areas, derived, driver) {
        Ok(()) => {
            areas.increment_erasecount(gb_pos);
            areas.mark_erased(gb_pos);
            summary.delete_summary(gb_pos);
            areas.set_garbage_buffer(Some(gb_pos));
            info!(
                "garbage collection freed area {} (now garbage buffer), activated area {} for {}",
                gb_pos, victim, target
            );
            Ok(())
        }
        Err(e) => {
            warn!("area {} failed to erase during garbage collection, retiring", gb_pos);
            areas.retire(gb_pos);
            summary.delete_summary(gb_pos);
            Err(e)
        }
    }
}

/// Closed area of `target` with the most dirty pages; ties go to the
/// area with the lower erase count (spec §4.4 step 1, wear levelling).
fn pick_victim(candidates: &[crate::addr::AreaPos], areas: &AreaManager, summary: &SummaryCache) -> crate::addr::AreaPos {
    let mut best = candidates[0];
    for &cand in &candidates[1..] {
        let (dirty_cand, dirty_best) = (summary.dirty_page_count(cand), summary.dirty_page_count(best));
        if dirty_cand > dirty_best
            || (dirty_cand == dirty_best && areas.area(cand).erase_count < areas.area(best).erase_count)
        {
            best = cand;
        }
    }
    best
}

/// An area with no live pages needs no copy at all: erase it directly
/// and drop its summary (spec §4.4 step 1 short-circuit).
fn reclaim_fully_dirty<D: Driver>(
    pos: crate::addr::AreaPos,
    areas: &mut AreaManager,
    summary: &mut SummaryCache,
    derived: &Derived,
    driver: &mut D,
) -> Result<(), Error> {
    erase_area(pos, areas, derived, driver).map_err(|e| {
        areas.retire(pos);
        e
    })?;
    areas.increment_erasecount(pos);
    areas.mark_erased(pos);
    summary.delete_summary(pos);
    debug!("area {} reclaimed without copy (no live pages)", pos);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn copy_live_pages<D: Driver>(
    victim: crate::addr::AreaPos,
    gb_pos: crate::addr::AreaPos,
    target: AreaType,
    areas: &mut AreaManager,
    summary: &mut SummaryCache,
    derived: &Derived,
    driver: &mut D,
) -> Result<(), Error> {
    areas.init_area(gb_pos, target);
    summary.init_fresh_area(gb_pos, areas, derived, driver)?;

    let page_size = derived.params.data_bytes_per_page as usize;
    let mut buf = vec![0u8; page_size];
    let victim_position = areas.area(victim).position;
    let gb_position = areas.area(gb_pos).position;

    for page in 0..derived.data_pages_per_area {
        let status = summary.get_page_status(victim, page, areas, derived, driver)?;
        if status != SummaryEntry::Used {
            continue;
        }
        let src = derived.page_abs(victim_position, page);
        driver.read_page(src, &mut buf).into_result()?;
        let dst = derived.page_abs(gb_position, page);
        driver.write_page(dst, &buf).into_result()?;
        summary.set_page_status(gb_pos, page, SummaryEntry::Used, areas, derived, driver)?;
    }
    Ok(())
}

fn erase_area<D: Driver>(
    pos: crate::addr::AreaPos,
    areas: &AreaManager,
    derived: &Derived,
    driver: &mut D,
) -> Result<(), Error> {
    let position = areas.area(pos).position;
    for block in derived.block_range(position) {
        driver.erase_block(block).into_result()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;
    use crate::driver::ram::RamDriver;

    fn setup() -> (AreaManager, SummaryCache, Derived, RamDriver) {
        let derived = Params::small().derive().unwrap();
        let areas = AreaManager::format(derived.areas_no, derived.data_pages_per_area);
        let summary = SummaryCache::new(derived.params.area_summary_cache_size as usize);
        let drv = RamDriver::new(
            derived.params.data_bytes_per_page as usize,
            derived.params.pages_per_block as usize,
            derived.params.blocks_total as usize,
        );
        (areas, summary, derived, drv)
    }

    fn write_page<D: Driver>(
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
        pos: crate::addr::AreaPos,
        page: u32,
        byte: u8,
    ) {
        let position = areas.area(pos).position;
        let abs = derived.page_abs(position, page);
        let buf = vec![byte; derived.params.data_bytes_per_page as usize];
        driver.write_page(abs, &buf).into_result().unwrap();
    }

    #[test]
    fn fully_dirty_victim_is_reclaimed_without_garbage_buffer() {
        let (mut areas, mut summary, derived, mut drv) = setup();
        let victim = areas.find_writable_area(AreaType::Data).unwrap();
        summary.init_fresh_area(victim, &areas, &derived, &mut drv).unwrap();
        for page in 0..derived.data_pages_per_area {
            summary
                .set_page_status(victim, page, SummaryEntry::Dirty, &areas, &derived, &mut drv)
                .unwrap();
        }
        areas.close_area(victim);

        collect_garbage(AreaType::Data, &mut areas, &mut summary, &derived, &mut drv).unwrap();

        assert_eq!(areas.garbage_buffer(), Some(victim));
        assert_eq!(areas.area(victim).status, crate::area::AreaStatus::Empty);
        assert_eq!(areas.area(victim).erase_count, 1);
    }

    #[test]
    fn partially_used_victim_is_compacted_into_garbage_buffer() {
        let (mut areas, mut summary, derived, mut drv) = setup();
        let victim = areas.find_writable_area(AreaType::Data).unwrap();
        let gb = areas.find_writable_area(AreaType::Index).unwrap();
        areas.close_area(gb);
        areas.set_garbage_buffer(Some(gb));

        summary.init_fresh_area(victim, &areas, &derived, &mut drv).unwrap();
        write_page(&areas, &derived, &mut drv, victim, 0, 0xAA);
        summary
            .set_page_status(victim, 0, SummaryEntry::Used, &areas, &derived, &mut drv)
            .unwrap();
        for page in 1..derived.data_pages_per_area {
            summary
                .set_page_status(victim, page, SummaryEntry::Dirty, &areas, &derived, &mut drv)
                .unwrap();
        }
        areas.close_area(victim);

        collect_garbage(AreaType::Data, &mut areas, &mut summary, &derived, &mut drv).unwrap();

        // `victim`'s logical id now resolves to the copied data and is
        // the active Data area; the old garbage buffer id is erased and
        // became the new garbage buffer.
        assert_eq!(areas.active_area(AreaType::Data), Some(victim));
        assert_eq!(areas.area(victim).itype, AreaType::Data);
        assert_eq!(areas.area(victim).pages_used, 1);
        let position = areas.area(victim).position;
        let abs = derived.page_abs(position, 0);
        let mut buf = vec![0u8; derived.params.data_bytes_per_page as usize];
        drv.read_page(abs, &mut buf).into_result().unwrap();
        assert_eq!(buf[0], 0xAA);

        assert_eq!(areas.garbage_buffer(), Some(gb));
        assert_eq!(areas.area(gb).status, crate::area::AreaStatus::Empty);
    }

    #[test]
    fn desperate_mode_without_garbage_buffer_needs_a_fully_dirty_victim() {
        let (mut areas, mut summary, derived, mut drv) = setup();
        let victim = areas.find_writable_area(AreaType::Data).unwrap();
        summary.init_fresh_area(victim, &areas, &derived, &mut drv).unwrap();
        write_page(&areas, &derived, &mut drv, victim, 0, 1);
        summary
            .set_page_status(victim, 0, SummaryEntry::Used, &areas, &derived, &mut drv)
            .unwrap();
        areas.close_area(victim);

        assert_eq!(areas.garbage_buffer(), None);
        let result = collect_garbage(AreaType::Data, &mut areas, &mut summary, &derived, &mut drv);
        assert_eq!(result, Err(Error::NoSpace));
    }
}
