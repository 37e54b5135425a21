//! Page-address cache (spec §4.6, component F).
//!
//! Grounded in `pageAddressCache.hpp`'s `PageAddressCache`: rather than
//! a full in-RAM tree mirroring every indirection page of every file
//! (what [`crate::btree::TreeCache`] does for the inode index), the PAC
//! holds only the *single currently addressed path* per indirection
//! order — one single-indirect list, a two-level double-indirect path,
//! a three-level triple-indirect path — and reloads a level when a
//! request steps outside the slot it currently covers, flushing
//! whatever it's replacing first so no write is lost. This keeps its
//! RAM footprint independent of file size, unlike a whole-subtree
//! cache.
//!
//! Address-list pages are written into the Index area, alongside
//! B⁺-tree nodes: both are filesystem metadata rather than file
//! content, and sizing a dedicated area type for them is not warranted
//! at the scale this core targets (recorded in `DESIGN.md`).

use crate::addr::Addr;
use crate::area::{AreaManager, AreaType};
use crate::config::Derived;
use crate::driver::Driver;
use crate::error::Error;
use crate::inode::{DIRECT_ADDR_COUNT, Inode};
use crate::summary::{SummaryCache, SummaryEntry};
use alloc::vec;
use alloc::vec::Vec;
use log::trace;

/// One resident address-list page: `entries[i]` is either a data-page
/// Addr (bottom level) or another list page's Addr (any level above
/// the bottom), `Addr::EMPTY` meaning unset in either case.
struct ListPage {
    addr: Addr,
    entries: Vec<Addr>,
    dirty: bool,
}

impl ListPage {
    fn empty(addrs_per_page: usize) -> ListPage {
        ListPage {
            addr: Addr::EMPTY,
            entries: vec![Addr::EMPTY; addrs_per_page],
            dirty: false,
        }
    }

    fn load<D: Driver>(
        addr: Addr,
        addrs_per_page: usize,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<ListPage, Error> {
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut buf = vec![0u8; page_size];
        let position = areas.area(addr.area()).position;
        let page_abs = derived.page_abs(position, addr.page());
        driver.read_page(page_abs, &mut buf).into_result()?;
        let mut entries = Vec::with_capacity(addrs_per_page);
        for i in 0..addrs_per_page {
            entries.push(Addr::from_u64(u64::from_le_bytes(
                buf[i * 8..i * 8 + 8].try_into().unwrap(),
            )));
        }
        if entries.iter().any(|a| !is_plausible(*a, areas)) {
            return Err(Error::BadFlash);
        }
        Ok(ListPage {
            addr,
            entries,
            dirty: false,
        })
    }

    fn load_or_create<D: Driver>(
        addr: Addr,
        create_if_unset: bool,
        addrs_per_page: usize,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Option<ListPage>, Error> {
        if addr.is_unset() {
            if create_if_unset {
                Ok(Some(ListPage::empty(addrs_per_page)))
            } else {
                Ok(None)
            }
        } else {
            Ok(Some(ListPage::load(addr, addrs_per_page, areas, derived, driver)?))
        }
    }

    /// Writes this page copy-on-write into a fresh Index-area slot if
    /// dirty, marking its old Addr (if any) dirty in its area's
    /// summary. A no-op (returns the existing Addr) when clean.
    fn flush<D: Driver>(
        &mut self,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Addr, Error> {
        if !self.dirty {
            return Ok(self.addr);
        }
        let old = self.addr;
        let area_pos = areas.find_writable_area(AreaType::Index)?;
        let page = areas.claim_page(area_pos).ok_or(Error::NoSpace)?;
        let new_addr = Addr::new(area_pos, page);

        let page_size = derived.params.data_bytes_per_page as usize;
        let mut buf = vec![0u8; page_size];
        for (i, a) in self.entries.iter().enumerate() {
            buf[i * 8..i * 8 + 8].copy_from_slice(&a.into_u64().to_le_bytes());
        }
        let page_abs = derived.page_abs(areas.area(area_pos).position, page);
        driver.write_page(page_abs, &buf).into_result()?;
        summary.set_page_status(area_pos, page, SummaryEntry::Used, areas, derived, driver)?;

        if !old.is_unset() {
            summary.set_page_status(old.area(), old.page(), SummaryEntry::Dirty, areas, derived, driver)?;
        }

        self.addr = new_addr;
        self.dirty = false;
        Ok(new_addr)
    }
}

/// Address lists carry no self-describing plausibility marker beyond
/// "every non-empty entry must name a real area" (spec §4.6
/// "Plausibility"); area 0 is reserved for the superblock chain and
/// never a legitimate indirection or data target.
fn is_plausible(addr: Addr, areas: &AreaManager) -> bool {
    addr.is_unset() || (addr.area() != 0 && addr.area() < areas.areas_no())
}

/// Resident address-list path for one indirection order, from the
/// anchor (what the inode's `indir`/`d_indir`/`t_indir` field points
/// at) down to the list that directly names data pages. `slots[i]` is
/// the index within `levels[i]` that was followed to reach
/// `levels[i+1]`.
struct Path {
    levels: Vec<ListPage>,
    slots: Vec<usize>,
}

impl Path {
    fn new() -> Path {
        Path {
            levels: Vec::new(),
            slots: Vec::new(),
        }
    }

    fn is_dirty(&self) -> bool {
        self.levels.iter().any(|l| l.dirty)
    }

    fn reset(&mut self) {
        self.levels.clear();
        self.slots.clear();
    }

    /// Ensures the path covers `wanted_slots` (one entry per
    /// intermediate level; empty for a single-indirect path, whose
    /// anchor page directly holds data-page addresses), loading levels
    /// as needed. `create` controls what happens on an unset entry:
    /// `false` (reads) stops and returns `false` without allocating
    /// anything; `true` (writes) materialises a fresh, empty page.
    /// Flushes any dirty level being replaced back into its
    /// still-resident parent before discarding it, so a switch never
    /// loses a pending write.
    #[allow(clippy::too_many_arguments)]
    fn goto<D: Driver>(
        &mut self,
        anchor: Addr,
        wanted_slots: &[usize],
        create: bool,
        addrs_per_page: usize,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<bool, Error> {
        if self.levels.is_empty() {
            match ListPage::load_or_create(anchor, create, addrs_per_page, areas, derived, driver)? {
                Some(p) => self.levels.push(p),
                None => return Ok(false),
            }
        }

        for (depth, &slot) in wanted_slots.iter().enumerate() {
            if self.slots.get(depth) == Some(&slot) && self.levels.len() > depth + 1 {
                continue;
            }
            while self.levels.len() > depth + 1 {
                let mut child = self.levels.pop().expect("checked len above");
                let child_slot = self.slots.pop().expect("levels/slots stay in lockstep");
                let new_addr = child.flush(areas, summary, derived, driver)?;
                if self.levels[depth].entries[child_slot] != new_addr {
                    self.levels[depth].entries[child_slot] = new_addr;
                    self.levels[depth].dirty = true;
                }
            }
            let child_addr = self.levels[depth].entries[slot];
            match ListPage::load_or_create(child_addr, create, addrs_per_page, areas, derived, driver)? {
                Some(p) => {
                    self.levels.push(p);
                    self.slots.push(slot);
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Flushes every dirty level bottom-up and returns the (possibly
    /// unchanged) anchor Addr. `Addr::EMPTY` if the path was never
    /// touched at all.
    fn flush_all<D: Driver>(
        &mut self,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Addr, Error> {
        if self.levels.is_empty() {
            return Ok(Addr::EMPTY);
        }
        for depth in (1..self.levels.len()).rev() {
            if self.levels[depth].dirty {
                let slot = self.slots[depth - 1];
                let new_addr = self.levels[depth].flush(areas, summary, derived, driver)?;
                if self.levels[depth - 1].entries[slot] != new_addr {
                    self.levels[depth - 1].entries[slot] = new_addr;
                    self.levels[depth - 1].dirty = true;
                }
            }
        }
        self.levels[0].flush(areas, summary, derived, driver)
    }
}

/// Per-target-inode cache of in-flight address-list pages (spec §4.6).
/// Exactly one inode is "targeted" at a time; callers must not
/// interleave `getPage`/`setPage` calls for two inodes without an
/// intervening `setTargetInode` (spec §5 "Shared resources").
pub struct Pac {
    addrs_per_page: usize,
    target: Option<Inode>,
    single: Path,
    double: Path,
    triple: Path,
}

impl Pac {
    pub fn new(derived: &Derived) -> Pac {
        Pac {
            addrs_per_page: derived.addrs_per_page,
            target: None,
            single: Path::new(),
            double: Path::new(),
            triple: Path::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.single.is_dirty() || self.double.is_dirty() || self.triple.is_dirty()
    }

    /// The inode currently targeted, if any. Data I/O mutates
    /// `size`/`reserved_pages`/`modi` directly on this shared copy
    /// rather than threading a separate one through alongside it.
    pub fn target(&self) -> Option<&Inode> {
        self.target.as_ref()
    }

    pub fn target_mut(&mut self) -> Option<&mut Inode> {
        self.target.as_mut()
    }

    /// Flushes any dirty path for the current target, then switches to
    /// `node` with every path unloaded (spec §4.6: "flushes the current
    /// dirty paths"). Returns the flushed inode (with updated anchor
    /// fields) when there was one; the caller persists it via
    /// `BTree::update_inode`.
    pub fn set_target_inode<D: Driver>(
        &mut self,
        node: Inode,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Option<Inode>, Error> {
        let flushed = if self.target.is_some() && self.is_dirty() {
            Some(self.commit(areas, summary, derived, driver)?)
        } else {
            None
        };
        self.single.reset();
        self.double.reset();
        self.triple.reset();
        self.target = Some(node);
        Ok(flushed)
    }

    fn decompose(&self, page_no: u32) -> Result<Slot, Error> {
        let a = self.addrs_per_page as u64;
        let mut offset = page_no as u64;

        if offset < DIRECT_ADDR_COUNT as u64 {
            return Ok(Slot::Direct(offset as usize));
        }
        offset -= DIRECT_ADDR_COUNT as u64;

        if offset < a {
            return Ok(Slot::Indirect {
                order: 1,
                path: Vec::new(),
                index: offset as usize,
            });
        }
        offset -= a;

        if offset < a * a {
            let top = (offset / a) as usize;
            let index = (offset % a) as usize;
            return Ok(Slot::Indirect {
                order: 2,
                path: vec![top],
                index,
            });
        }
        offset -= a * a;

        if offset < a * a * a {
            let top = (offset / (a * a)) as usize;
            let mid = ((offset / a) % a) as usize;
            let index = (offset % a) as usize;
            return Ok(Slot::Indirect {
                order: 3,
                path: vec![top, mid],
                index,
            });
        }

        Err(Error::InvalidInput)
    }

    pub fn get_page<D: Driver>(
        &mut self,
        page_no: u32,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Addr, Error> {
        let inode = self.target.as_ref().ok_or(Error::NotMounted)?;
        match self.decompose(page_no)? {
            Slot::Direct(i) => Ok(inode.direct[i]),
            Slot::Indirect { order, path, index } => {
                let anchor = match order {
                    1 => inode.indir,
                    2 => inode.d_indir,
                    _ => inode.t_indir,
                };
                if anchor.is_unset() {
                    return Ok(Addr::EMPTY);
                }
                let addrs_per_page = self.addrs_per_page;
                let found = self.path_for(order).goto(
                    anchor, &path, false, addrs_per_page, areas, summary, derived, driver,
                )?;
                if !found {
                    return Ok(Addr::EMPTY);
                }
                Ok(self.path_for(order).levels.last().expect("goto populated it").entries[index])
            }
        }
    }

    pub fn set_page<D: Driver>(
        &mut self,
        page_no: u32,
        addr: Addr,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        match self.decompose(page_no)? {
            Slot::Direct(i) => {
                let inode = self.target.as_mut().ok_or(Error::NotMounted)?;
                inode.direct[i] = addr;
                Ok(())
            }
            Slot::Indirect { order, path, index } => {
                let anchor = {
                    let inode = self.target.as_ref().ok_or(Error::NotMounted)?;
                    match order {
                        1 => inode.indir,
                        2 => inode.d_indir,
                        _ => inode.t_indir,
                    }
                };
                let addrs_per_page = self.addrs_per_page;
                self.path_for(order)
                    .goto(anchor, &path, true, addrs_per_page, areas, summary, derived, driver)?;
                let level = self.path_for(order).levels.last_mut().expect("goto populated it");
                level.entries[index] = addr;
                level.dirty = true;
                Ok(())
            }
        }
    }

    /// Clears every page address in `[from, to)` back to unset, for
    /// truncation (spec §4.7). Out-of-range pages (beyond whatever is
    /// currently allocated) are simply no-ops.
    pub fn delete_pages<D: Driver>(
        &mut self,
        from: u32,
        to: u32,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        for page_no in from..to {
            match self.get_page(page_no, areas, summary, derived, driver) {
                Ok(addr) if !addr.is_unset() => {
                    self.set_page(page_no, Addr::EMPTY, areas, summary, derived, driver)?;
                }
                Ok(_) => {}
                Err(Error::InvalidInput) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Commits every dirty path bottom-up, updates the target inode's
    /// anchor fields in place and returns its new value for the caller
    /// to persist via `BTree::update_inode`.
    pub fn commit<D: Driver>(
        &mut self,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Inode, Error> {
        let mut inode = self.target.clone().ok_or(Error::NotMounted)?;

        if self.single.is_dirty() {
            inode.indir = self.single.flush_all(areas, summary, derived, driver)?;
        }
        if self.double.is_dirty() {
            inode.d_indir = self.double.flush_all(areas, summary, derived, driver)?;
        }
        if self.triple.is_dirty() {
            inode.t_indir = self.triple.flush_all(areas, summary, derived, driver)?;
        }

        self.target = Some(inode.clone());
        trace!("pac committed dirty paths for inode {}", inode.no);
        Ok(inode)
    }

    fn path_for(&mut self, order: u8) -> &mut Path {
        match order {
            1 => &mut self.single,
            2 => &mut self.double,
            _ => &mut self.triple,
        }
    }
}

enum Slot {
    Direct(usize),
    Indirect {
        order: u8,
        path: Vec<usize>,
        index: usize,
    },
}
