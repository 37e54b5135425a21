//! Area manager (spec §4.2, component B).
//!
//! The area map is a dense, total `Vec<Area>` indexed by logical
//! [`AreaPos`]; `Area::position` is the *physical* slot the logical
//! entry currently resolves to (spec §3 "Addressing"). [`AreaManager`]
//! intentionally does not know about the summary cache or garbage
//! collector above it in the dependency order (spec §2 control flow
//! table: `G/E -> (F, C) -> (B -> A)`); it only tracks how many pages
//! have been handed out of each area, via [`AreaManager::claim_page`].
//! Callers that cannot get a page (an active area is full, and no empty
//! area remains) get `Error::NoSpace` and are expected to invoke GC and
//! retry — that retry loop lives in `Device`, not here.

use crate::addr::AreaPos;
use crate::error::Error;
use core::fmt;
use log::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaType {
    Unset,
    Superblock,
    Index,
    Data,
    GarbageBuffer,
    Retired,
}

impl AreaType {
    /// Types that ever have exactly one active area (spec §3 Area
    /// invariants). `GarbageBuffer` is tracked separately since it is
    /// never "active" in the find-writable-area sense.
    const ACTIVE_KINDS: [AreaType; 3] = [AreaType::Superblock, AreaType::Index, AreaType::Data];

    fn active_slot(self) -> Option<usize> {
        Self::ACTIVE_KINDS.iter().position(|k| *k == self)
    }

    /// Stable on-flash/on-wire tag (journal entries, superblock area-map
    /// snapshots). Not the same ordinal as the `enum` declaration order
    /// by coincidence only; keep both lists in sync if a variant moves.
    pub fn to_tag(self) -> u8 {
        match self {
            AreaType::Unset => 0,
            AreaType::Superblock => 1,
            AreaType::Index => 2,
            AreaType::Data => 3,
            AreaType::GarbageBuffer => 4,
            AreaType::Retired => 5,
        }
    }

    pub fn from_tag(v: u8) -> Result<AreaType, Error> {
        Ok(match v {
            0 => AreaType::Unset,
            1 => AreaType::Superblock,
            2 => AreaType::Index,
            3 => AreaType::Data,
            4 => AreaType::GarbageBuffer,
            5 => AreaType::Retired,
            _ => return Err(Error::Bug),
        })
    }
}

impl fmt::Display for AreaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AreaType::Unset => "unset",
            AreaType::Superblock => "superblock",
            AreaType::Index => "index",
            AreaType::Data => "data",
            AreaType::GarbageBuffer => "garbage_buffer",
            AreaType::Retired => "retired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaStatus {
    Closed,
    Active,
    Empty,
}

impl AreaStatus {
    pub fn to_tag(self) -> u8 {
        match self {
            AreaStatus::Closed => 0,
            AreaStatus::Active => 1,
            AreaStatus::Empty => 2,
        }
    }

    pub fn from_tag(v: u8) -> Result<AreaStatus, Error> {
        Ok(match v {
            0 => AreaStatus::Closed,
            1 => AreaStatus::Active,
            2 => AreaStatus::Empty,
            _ => return Err(Error::Bug),
        })
    }
}

impl fmt::Display for AreaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AreaStatus::Closed => "closed",
            AreaStatus::Active => "active",
            AreaStatus::Empty => "empty",
        };
        f.write_str(s)
    }
}

/// Semantic record per logical area (spec §3 "Area").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub itype: AreaType,
    pub status: AreaStatus,
    pub erase_count: u32,
    pub position: AreaPos,
    pages_used: u32,
}

impl Area {
    fn empty_at(position: AreaPos) -> Area {
        Area {
            itype: AreaType::Unset,
            status: AreaStatus::Empty,
            erase_count: 0,
            position,
            pages_used: 0,
        }
    }

    pub fn pages_used(&self) -> u32 {
        self.pages_used
    }
}

pub struct AreaManager {
    areas: alloc::vec::Vec<Area>,
    active: [Option<AreaPos>; 3],
    garbage_buffer: Option<AreaPos>,
    data_pages_per_area: u32,
}

impl AreaManager {
    /// Areas are created once at format time (spec §3 "Lifecycle"); the
    /// map starts as an identity mapping (logical id == physical slot)
    /// with every area `Empty`.
    pub fn format(areas_no: u32, data_pages_per_area: u32) -> AreaManager {
        let areas = (0..areas_no).map(Area::empty_at).collect();
        AreaManager {
            areas,
            active: [None; 3],
            garbage_buffer: None,
            data_pages_per_area,
        }
    }

    pub fn areas_no(&self) -> u32 {
        self.areas.len() as u32
    }

    pub fn area(&self, pos: AreaPos) -> &Area {
        &self.areas[pos as usize]
    }

    pub fn area_mut(&mut self, pos: AreaPos) -> &mut Area {
        &mut self.areas[pos as usize]
    }

    pub fn all_areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn active_area(&self, ty: AreaType) -> Option<AreaPos> {
        self.active[ty.active_slot()?]
    }

    pub fn garbage_buffer(&self) -> Option<AreaPos> {
        self.garbage_buffer
    }

    pub fn set_garbage_buffer(&mut self, pos: Option<AreaPos>) {
        self.garbage_buffer = pos;
    }

    /// Returns the active area for `ty` if it still has free pages;
    /// otherwise claims a fresh `Empty` area (lowest erase count first,
    /// spec §4.2 wear consideration), initialises it and makes it
    /// active. Fails with `NoSpace` if none is available; the caller is
    /// expected to invoke GC and retry (spec §4.2).
    pub fn find_writable_area(&mut self, ty: AreaType) -> Result<AreaPos, Error> {
        if let Some(pos) = self.active_area(ty) {
            if self.area(pos).pages_used < self.data_pages_per_area {
                return Ok(pos);
            }
        }
        let candidate = self
            .areas
            .iter()
            .enumerate()
            .filter(|(_, a)| a.status == AreaStatus::Empty)
            .min_by_key(|(_, a)| a.erase_count)
            .map(|(i, _)| i as AreaPos);

        match candidate {
            Some(pos) => {
                self.init_area(pos, ty);
                debug!("area {} claimed as new active {} area", pos, ty);
                Ok(pos)
            }
            None => {
                trace!("no empty area available for {}", ty);
                Err(Error::NoSpace)
            }
        }
    }

    /// Claims an `Empty` area for `ty`, marking it `Active`.
    pub fn init_area(&mut self, pos: AreaPos, ty: AreaType) {
        let area = self.area_mut(pos);
        area.itype = ty;
        area.status = AreaStatus::Active;
        area.pages_used = 0;
        if let Some(slot) = ty.active_slot() {
            self.active[slot] = Some(pos);
        }
    }

    /// Re-activates an area that already holds data copied in by GC
    /// (spec §4.4 step 7, "make the new area active for target"),
    /// preserving the page count already claimed within it instead of
    /// resetting to zero the way [`AreaManager::init_area`] does for a
    /// genuinely empty area.
    pub fn activate(&mut self, pos: AreaPos, ty: AreaType, pages_used: u32) {
        let area = self.area_mut(pos);
        area.itype = ty;
        area.status = AreaStatus::Active;
        area.pages_used = pages_used;
        if let Some(slot) = ty.active_slot() {
            self.active[slot] = Some(pos);
        }
    }

    /// Forces the active area of `ty` to `Closed` (out of free pages,
    /// write failure, or explicit unmount close, spec §4.10).
    pub fn close_area(&mut self, pos: AreaPos) {
        let ty = self.area(pos).itype;
        self.area_mut(pos).status = AreaStatus::Closed;
        if let Some(slot) = ty.active_slot() {
            if self.active[slot] == Some(pos) {
                self.active[slot] = None;
            }
        }
    }

    /// Swaps the *physical* position two logical areas resolve to,
    /// without touching either entry's type/status/erase count. Used by
    /// GC after copying a victim's live pages into the garbage buffer,
    /// so `Addr`s naming the victim's logical id keep resolving to live
    /// data (spec §4.4 step 5).
    pub fn swap(&mut self, a: AreaPos, b: AreaPos) {
        let pa = self.areas[a as usize].position;
        let pb = self.areas[b as usize].position;
        self.areas[a as usize].position = pb;
        self.areas[b as usize].position = pa;
    }

    /// Withdraws an area from use after an irrecoverable erase/write
    /// failure (spec §4.10). Retired areas never reappear as allocation
    /// targets.
    pub fn retire(&mut self, pos: AreaPos) {
        warn!("retiring area {} after persistent flash failure", pos);
        let area = self.area_mut(pos);
        let was_active_ty = area.itype;
        area.itype = AreaType::Retired;
        area.status = AreaStatus::Closed;
        if let Some(slot) = was_active_ty.active_slot() {
            if self.active[slot] == Some(pos) {
                self.active[slot] = None;
            }
        }
        if self.garbage_buffer == Some(pos) {
            self.garbage_buffer = None;
        }
    }

    pub fn increment_erasecount(&mut self, pos: AreaPos) {
        let area = self.area_mut(pos);
        area.erase_count = area.erase_count.wrapping_add(1);
    }

    /// Hands out the next free page offset within `pos`, or `None` if
    /// the area has no free pages left.
    pub fn claim_page(&mut self, pos: AreaPos) -> Option<u32> {
        let area = self.area_mut(pos);
        if area.pages_used >= self.data_pages_per_area {
            return None;
        }
        let page = area.pages_used;
        area.pages_used += 1;
        Some(page)
    }

    /// After a GC erase, the reclaimed area becomes `Empty` again and
    /// loses its former type (spec §4.10: `(any) -> empty` only via an
    /// erase cycle, never directly).
    pub fn mark_erased(&mut self, pos: AreaPos) {
        let area = self.area_mut(pos);
        area.itype = AreaType::Unset;
        area.status = AreaStatus::Empty;
        area.pages_used = 0;
    }

    pub fn data_pages_per_area(&self) -> u32 {
        self.data_pages_per_area
    }

    /// Reconstructs one area's full state from a super-index snapshot at
    /// mount (spec §4.8: "full area-map snapshot"). Also re-derives the
    /// active-area/garbage-buffer slot tracking, since that bookkeeping
    /// is never itself persisted — only `itype`/`status` are, and the
    /// slot is a pure function of them.
    pub fn restore_area(
        &mut self,
        pos: AreaPos,
        itype: AreaType,
        status: AreaStatus,
        erase_count: u32,
        position: AreaPos,
        pages_used: u32,
    ) {
        let area = self.area_mut(pos);
        area.itype = itype;
        area.status = status;
        area.erase_count = erase_count;
        area.position = position;
        area.pages_used = pages_used;
        if status == AreaStatus::Active {
            if let Some(slot) = itype.active_slot() {
                self.active[slot] = Some(pos);
            }
        }
        if itype == AreaType::GarbageBuffer {
            self.garbage_buffer = Some(pos);
        }
    }

    /// Closed areas of `ty`, most-dirty-first is the GC's job
    /// ([`crate::gc`]); this just exposes the candidate set.
    pub fn closed_areas_of(&self, ty: AreaType) -> impl Iterator<Item = AreaPos> + '_ {
        self.areas.iter().enumerate().filter_map(move |(i, a)| {
            (a.itype == ty && a.status == AreaStatus::Closed).then_some(i as AreaPos)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_empty_area_on_first_write() {
        let mut mgr = AreaManager::format(16, 30);
        let pos = mgr.find_writable_area(AreaType::Data).unwrap();
        assert_eq!(mgr.area(pos).status, AreaStatus::Active);
        assert_eq!(mgr.active_area(AreaType::Data), Some(pos));
    }

    #[test]
    fn reuses_active_area_while_it_has_space() {
        let mut mgr = AreaManager::format(16, 2);
        let pos = mgr.find_writable_area(AreaType::Data).unwrap();
        mgr.claim_page(pos);
        let pos2 = mgr.find_writable_area(AreaType::Data).unwrap();
        assert_eq!(pos, pos2);
    }

    #[test]
    fn fails_with_no_space_when_all_areas_taken() {
        let mut mgr = AreaManager::format(1, 4);
        mgr.find_writable_area(AreaType::Data).unwrap();
        assert_eq!(
            mgr.find_writable_area(AreaType::Superblock),
            Err(Error::NoSpace)
        );
    }

    #[test]
    fn swap_preserves_type_and_status() {
        let mut mgr = AreaManager::format(4, 4);
        mgr.init_area(0, AreaType::Data);
        mgr.init_area(1, AreaType::GarbageBuffer);
        mgr.swap(0, 1);
        assert_eq!(mgr.area(0).itype, AreaType::Data);
        assert_eq!(mgr.area(1).itype, AreaType::GarbageBuffer);
        assert_eq!(mgr.area(0).position, 1);
        assert_eq!(mgr.area(1).position, 0);
    }

    #[test]
    fn prefers_lowest_erase_count_empty_area() {
        let mut mgr = AreaManager::format(3, 4);
        mgr.area_mut(0).erase_count = 5;
        mgr.area_mut(1).erase_count = 1;
        mgr.area_mut(2).erase_count = 9;
        let pos = mgr.find_writable_area(AreaType::Index).unwrap();
        assert_eq!(pos, 1);
    }

    #[test]
    fn retired_areas_never_return() {
        let mut mgr = AreaManager::format(1, 4);
        mgr.retire(0);
        assert_eq!(
            mgr.find_writable_area(AreaType::Data),
            Err(Error::NoSpace)
        );
    }
}
