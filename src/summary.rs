//! Area-summary cache (spec §4.3, component C).
//!
//! Caches a per-area, 2-bits-per-page liveness vector and persists it
//! into the area's own reserved trailing pages on commit. Grounded in
//! the teacher's `Buffer`/`Volume` split (a RAM-resident view that is
//! explicitly, separately "committed" to the backing store): here the
//! RAM view is [`CachedSummary`] and the backing-store write happens in
//! [`SummaryCache::commit`], which is the only place this module touches
//! the [`crate::driver::Driver`] trait.

use crate::addr::{AreaPos, PageAbs};
use crate::area::{AreaManager, AreaStatus};
use crate::config::Derived;
use crate::driver::Driver;
use crate::error::Error;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryEntry {
    Free,
    Used,
    Dirty,
    Error,
}

impl SummaryEntry {
    fn to_bits(self) -> u8 {
        match self {
            SummaryEntry::Free => 0b00,
            SummaryEntry::Used => 0b01,
            SummaryEntry::Dirty => 0b10,
            SummaryEntry::Error => 0b11,
        }
    }

    fn from_bits(bits: u8) -> SummaryEntry {
        match bits & 0b11 {
            0b00 => SummaryEntry::Free,
            0b01 => SummaryEntry::Used,
            0b10 => SummaryEntry::Dirty,
            _ => SummaryEntry::Error,
        }
    }
}

/// Meta byte preceding the packed bitmap (SPEC_FULL.md "Area summary
/// meta byte"): low nibble is a format version, high bit records
/// whether this summary was ever durably committed.
const SUMMARY_FORMAT_VERSION: u8 = 1;
const META_AS_WRITTEN_BIT: u8 = 0x80;

struct CachedSummary {
    pages: Vec<SummaryEntry>,
    dirty: bool,
    as_written: bool,
    loaded_from_super_page: bool,
    last_touch: u64,
}

/// Fixed-capacity cache of per-area page-status vectors (spec §4.3).
pub struct SummaryCache {
    capacity: usize,
    entries: BTreeMap<AreaPos, CachedSummary>,
    clock: u64,
}

impl SummaryCache {
    pub fn new(capacity: usize) -> SummaryCache {
        SummaryCache {
            capacity,
            entries: BTreeMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Installs a freshly-claimed area (status `Empty` -> `Active`) as
    /// an all-`Free` summary, bypassing the flash-read path since there
    /// is nothing committed yet to read.
    pub fn init_fresh_area<D: Driver>(
        &mut self,
        pos: AreaPos,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        self.make_room(pos, areas, derived, driver)?;
        let touch = self.tick();
        self.entries.insert(
            pos,
            CachedSummary {
                pages: vec![SummaryEntry::Free; derived.data_pages_per_area as usize],
                dirty: false,
                as_written: false,
                loaded_from_super_page: false,
                last_touch: touch,
            },
        );
        Ok(())
    }

    /// Installs a compact one-bit-per-page (free vs used) summary
    /// carried by a super-index snapshot (spec §4.3
    /// `loaded_from_super_page`). Upgraded to full 2-bit precision on
    /// first mutation.
    pub fn adopt_compact<D: Driver>(
        &mut self,
        pos: AreaPos,
        free_bits: &[bool],
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        self.make_room(pos, areas, derived, driver)?;
        let pages = free_bits
            .iter()
            .map(|&free| if free { SummaryEntry::Free } else { SummaryEntry::Used })
            .collect();
        let touch = self.tick();
        self.entries.insert(
            pos,
            CachedSummary {
                pages,
                dirty: false,
                as_written: false,
                loaded_from_super_page: true,
                last_touch: touch,
            },
        );
        Ok(())
    }

    fn ensure_loaded<D: Driver>(
        &mut self,
        pos: AreaPos,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        if self.entries.contains_key(&pos) {
            return Ok(());
        }
        self.load_area_summary(pos, areas, derived, driver)
    }

    /// Reads the packed bitmap from the area's trailing summary pages.
    /// If the meta byte shows the area was never committed (a freshly
    /// active area, or one whose previous occupant was erased), the
    /// summary is assumed all-`Free`.
    pub fn load_area_summary<D: Driver>(
        &mut self,
        pos: AreaPos,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        self.make_room(pos, areas, derived, driver)?;
        let area = areas.area(pos);
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut packed = Vec::with_capacity(derived.oob_pages_per_area as usize * page_size);
        let mut buf = vec![0u8; page_size];
        for i in 0..derived.oob_pages_per_area {
            let page_offset = derived.data_pages_per_area + i;
            let page_abs = summary_page_abs(area.position, page_offset, derived);
            driver.read_page(page_abs, &mut buf).into_result()?;
            packed.extend_from_slice(&buf);
        }
        let touch = self.tick();
        let entry = if packed.first().copied().unwrap_or(0) & META_AS_WRITTEN_BIT != 0 {
            CachedSummary {
                pages: unpack_bits(&packed[1..], derived.data_pages_per_area as usize),
                dirty: false,
                as_written: true,
                loaded_from_super_page: false,
                last_touch: touch,
            }
        } else {
            CachedSummary {
                pages: vec![SummaryEntry::Free; derived.data_pages_per_area as usize],
                dirty: false,
                as_written: false,
                loaded_from_super_page: false,
                last_touch: touch,
            }
        };
        self.entries.insert(pos, entry);
        Ok(())
    }

    pub fn get_page_status<D: Driver>(
        &mut self,
        pos: AreaPos,
        page: u32,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<SummaryEntry, Error> {
        self.ensure_loaded(pos, areas, derived, driver)?;
        let touch = self.tick();
        let cached = self.entries.get_mut(&pos).ok_or(Error::Bug)?;
        cached.last_touch = touch;
        cached.pages.get(page as usize).copied().ok_or(Error::Bug)
    }

    /// Marks `page` within `pos`. Per spec §4.3, any mutation clears
    /// `loaded_from_super_page` (the cache has now committed to full
    /// 2-bit precision) and marks the area's entry dirty.
    pub fn set_page_status<D: Driver>(
        &mut self,
        pos: AreaPos,
        page: u32,
        entry: SummaryEntry,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        self.ensure_loaded(pos, areas, derived, driver)?;
        let touch = self.tick();
        let cached = self.entries.get_mut(&pos).ok_or(Error::Bug)?;
        let slot = cached.pages.get_mut(page as usize).ok_or(Error::Bug)?;
        *slot = entry;
        cached.dirty = true;
        cached.loaded_from_super_page = false;
        cached.last_touch = touch;
        Ok(())
    }

    /// Writes the packed bitmap into the area's trailing summary pages.
    /// An area cannot be committed a second time once `as_written`
    /// (spec §4.3): further mutations stay in-memory-only until the
    /// area is reclaimed by GC.
    pub fn commit<D: Driver>(
        &mut self,
        pos: AreaPos,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        let cached = self.entries.get(&pos).ok_or(Error::Bug)?;
        if cached.as_written {
            trace!("area {} summary already written, skipping re-commit", pos);
            return Ok(());
        }
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut packed = pack_bits(&cached.pages);
        let meta = SUMMARY_FORMAT_VERSION | META_AS_WRITTEN_BIT;
        let mut out = Vec::with_capacity(1 + packed.len());
        out.push(meta);
        out.append(&mut packed);
        out.resize(derived.oob_pages_per_area as usize * page_size, 0);

        let area = areas.area(pos);
        for i in 0..derived.oob_pages_per_area {
            let page_offset = derived.data_pages_per_area + i;
            let page_abs = summary_page_abs(area.position, page_offset, derived);
            let start = i as usize * page_size;
            driver
                .write_page(page_abs, &out[start..start + page_size])
                .into_result()?;
        }
        debug!("committed summary for area {}", pos);
        let cached = self.entries.get_mut(&pos).ok_or(Error::Bug)?;
        cached.as_written = true;
        cached.dirty = false;
        Ok(())
    }

    /// Drops an entry for an area that has been fully erased, without
    /// writing it back (spec §4.3 eviction: "entries for areas that
    /// have been fully erased are dropped without writing").
    pub fn delete_summary(&mut self, pos: AreaPos) {
        self.entries.remove(&pos);
    }

    pub fn is_cached(&self, pos: AreaPos) -> bool {
        self.entries.contains_key(&pos)
    }

    /// Swaps the cache entries keyed `a` and `b`, mirroring
    /// [`AreaManager::swap`] so a logical area's cached summary keeps
    /// describing whatever physical content that logical id resolves to
    /// after the swap (spec §4.4 step 5).
    pub fn swap_keys(&mut self, a: AreaPos, b: AreaPos) {
        let ea = self.entries.remove(&a);
        let eb = self.entries.remove(&b);
        if let Some(v) = eb {
            self.entries.insert(a, v);
        }
        if let Some(v) = ea {
            self.entries.insert(b, v);
        }
    }

    pub fn is_dirty(&self, pos: AreaPos) -> bool {
        self.entries.get(&pos).map(|c| c.dirty).unwrap_or(false)
    }

    pub fn dirty_page_count(&self, pos: AreaPos) -> usize {
        self.entries
            .get(&pos)
            .map(|c| c.pages.iter().filter(|p| **p == SummaryEntry::Dirty).count())
            .unwrap_or(0)
    }

    pub fn used_page_count(&self, pos: AreaPos) -> usize {
        self.entries
            .get(&pos)
            .map(|c| c.pages.iter().filter(|p| **p == SummaryEntry::Used).count())
            .unwrap_or(0)
    }

    /// Compact one-bit-per-page free/used view, as stored into a
    /// super-index snapshot (spec §6 "Super-index").
    pub fn compact_bits(&self, pos: AreaPos) -> Option<Vec<bool>> {
        self.entries
            .get(&pos)
            .map(|c| c.pages.iter().map(|p| *p == SummaryEntry::Free).collect())
    }

    /// Evicts entries to make room for `incoming`, per the spec §4.3
    /// eviction policy: prefer an entry that is not the active area of
    /// any type and not dirty; if every cached entry is dirty, commit
    /// (then evict) the least-recently-touched one first.
    fn make_room<D: Driver>(
        &mut self,
        incoming: AreaPos,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        if self.entries.contains_key(&incoming) || self.entries.len() < self.capacity {
            return Ok(());
        }
        let is_active = |pos: AreaPos| areas.area(pos).status == AreaStatus::Active;

        let clean_inactive = self
            .entries
            .iter()
            .filter(|(&pos, c)| !is_active(pos) && !c.dirty)
            .min_by_key(|(_, c)| c.last_touch)
            .map(|(&pos, _)| pos);

        if let Some(victim) = clean_inactive {
            self.entries.remove(&victim);
            return Ok(());
        }

        let lru_dirty = self
            .entries
            .iter()
            .filter(|(&pos, _)| !is_active(pos))
            .min_by_key(|(_, c)| c.last_touch)
            .map(|(&pos, _)| pos)
            .ok_or(Error::OutOfCacheMemory)?;

        self.commit(lru_dirty, areas, derived, driver)?;
        self.entries.remove(&lru_dirty);
        Ok(())
    }
}

fn summary_page_abs(position: AreaPos, page_offset: u32, derived: &Derived) -> PageAbs {
    position as PageAbs * derived.total_pages_per_area as PageAbs + page_offset as PageAbs
}

fn pack_bits(pages: &[SummaryEntry]) -> Vec<u8> {
    let mut out = vec![0u8; (pages.len() * 2 + 7) / 8];
    for (i, p) in pages.iter().enumerate() {
        let byte = i / 4;
        let shift = (i % 4) * 2;
        out[byte] |= p.to_bits() << shift;
    }
    out
}

fn unpack_bits(packed: &[u8], count: usize) -> Vec<SummaryEntry> {
    (0..count)
        .map(|i| {
            let byte = i / 4;
            let shift = (i % 4) * 2;
            let bits = packed.get(byte).copied().unwrap_or(0) >> shift;
            SummaryEntry::from_bits(bits)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaType;
    use crate::config::Params;
    use crate::driver::ram::RamDriver;

    fn setup() -> (AreaManager, Derived, RamDriver) {
        let derived = Params::small().derive().unwrap();
        let mgr = AreaManager::format(derived.areas_no, derived.data_pages_per_area);
        let drv = RamDriver::new(
            derived.params.data_bytes_per_page as usize,
            derived.params.pages_per_block as usize,
            derived.params.blocks_total as usize,
        );
        (mgr, derived, drv)
    }

    #[test]
    fn pack_roundtrip() {
        let pages = vec![
            SummaryEntry::Free,
            SummaryEntry::Used,
            SummaryEntry::Dirty,
            SummaryEntry::Error,
            SummaryEntry::Used,
        ];
        let packed = pack_bits(&pages);
        let back = unpack_bits(&packed, pages.len());
        assert_eq!(pages, back);
    }

    #[test]
    fn fresh_area_is_all_free_and_round_trips_commit() {
        let (mut mgr, derived, mut drv) = setup();
        mgr.init_area(0, AreaType::Data);
        let mut cache = SummaryCache::new(4);
        cache.init_fresh_area(0, &mgr, &derived, &mut drv).unwrap();
        assert_eq!(
            cache.get_page_status(0, 0, &mgr, &derived, &mut drv).unwrap(),
            SummaryEntry::Free
        );
        cache
            .set_page_status(0, 0, SummaryEntry::Used, &mgr, &derived, &mut drv)
            .unwrap();
        assert!(cache.is_dirty(0));
        cache.commit(0, &mgr, &derived, &mut drv).unwrap();
        assert!(!cache.is_dirty(0));

        let mut cache2 = SummaryCache::new(4);
        assert_eq!(
            cache2
                .get_page_status(0, 0, &mgr, &derived, &mut drv)
                .unwrap(),
            SummaryEntry::Used
        );
        assert_eq!(
            cache2
                .get_page_status(0, 1, &mgr, &derived, &mut drv)
                .unwrap(),
            SummaryEntry::Free
        );
    }

    #[test]
    fn eviction_prefers_clean_inactive_entries() {
        let (mut mgr, derived, mut drv) = setup();
        for i in 0..4 {
            mgr.init_area(i, AreaType::Data);
        }
        mgr.close_area(1);
        let mut cache = SummaryCache::new(3);
        for i in 0..3u32 {
            cache.init_fresh_area(i, &mgr, &derived, &mut drv).unwrap();
        }
        // area 1 is closed (not active) and clean: it should be evicted
        // to make room, not area 0 (active).
        cache.init_fresh_area(3, &mgr, &derived, &mut drv).unwrap();
        assert!(!cache.entries.contains_key(&1));
        assert!(cache.entries.contains_key(&0));
    }
}
