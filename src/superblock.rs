//! Superblock chain (spec §4.8, component H): anchor, jump pads and
//! super-index, rooting the filesystem at mount time.
//!
//! Grounded in `ds/paffs/superblock.c`'s `commitSuperIndex`/
//! `getAddrOfMostRecentSuperIndex` (serial+1 on every commit, ping-pong
//! between two physical blocks, pick the higher serial on scan,
//! deterministic tie-break by page index) and `superblock.h`'s
//! `anchorEntry`/`jumpPadEntry`/`superIndex` field names, generalised
//! to the three-layer chain spec §3/§4.8 describe (the C source writes
//! the super-index directly into block 0/1 with no separate jump-pad
//! indirection; jump pads are sized by `Params::jump_pad_no` here and
//! chained beyond the anchor blocks instead).
//!
//! Bootstrap addressing. Before a mount has read a super-index there is
//! no area map to resolve a logical [`Addr`] to a physical page. Area 0
//! breaks that circularity: by convention it is permanently reserved
//! for the superblock chain and is never a target of
//! [`crate::area::AreaManager::swap`], so `Addr::new(0, page)` always
//! means physical page `page` of area 0, scan or no scan. This module
//! is the only one in the crate allowed to assume that.

use crate::addr::{Addr, AreaPos, BlockAbs};
use crate::area::{AreaManager, AreaStatus, AreaType};
use crate::config::{Derived, Params};
use crate::driver::Driver;
use crate::error::Error;
use crate::inode::{Reader, Writer};
use crate::summary::SummaryCache;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, trace, warn};

/// The physical/logical area permanently reserved for the chain.
pub(crate) const CHAIN_AREA: AreaPos = 0;
/// Anchor occupies blocks 0 and 1 of the chain area, ping-ponged.
const ANCHOR_BLOCKS: u32 = 2;

/// Active-area types carried in `active_area`/`per-active-area compact
/// summary` (spec §4.8 step 3), in a fixed on-flash order.
const SNAPSHOT_KINDS: [AreaType; 3] = [AreaType::Superblock, AreaType::Index, AreaType::Data];

fn fnv1a(buf: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for b in buf {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; (bits.len() + 7) / 8];
    for (i, b) in bits.iter().enumerate() {
        if *b {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

fn unpack_bits(buf: &[u8], len: usize) -> Vec<bool> {
    (0..len).map(|i| buf[i / 8] & (1 << (i % 8)) != 0).collect()
}

/// Fixed at the head of area 0's block 0/1 ping-pong (spec §4.8 layer
/// 1). Carries the device's format-time geometry so a mount can refuse
/// to interpret a device formatted with incompatible parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorEntry {
    pub serial: u64,
    pub fs_version: u8,
    pub params: Params,
    /// First page of the jump-pad/super-index chain for this serial.
    pub chain_head: Addr,
}

impl AnchorEntry {
    const PAYLOAD_SIZE: usize = 8 + 1 + Params::ON_FLASH_SIZE + 8;
    const ON_FLASH_SIZE: usize = Self::PAYLOAD_SIZE + 4;

    fn to_bytes(&self, out: &mut [u8]) {
        let mut payload = [0u8; Self::PAYLOAD_SIZE];
        {
            let mut w = Writer::new(&mut payload);
            w.u64(self.serial);
            w.u8(self.fs_version);
            let mut pbuf = [0u8; Params::ON_FLASH_SIZE];
            self.params.to_bytes(&mut pbuf);
            w.bytes(&pbuf);
            w.u64(self.chain_head.into_u64());
        }
        let mut w = Writer::new(out);
        w.bytes(&payload);
        w.u32(fnv1a(&payload));
    }

    fn from_bytes(buf: &[u8]) -> Option<AnchorEntry> {
        if buf.len() < Self::ON_FLASH_SIZE {
            return None;
        }
        let payload = &buf[..Self::PAYLOAD_SIZE];
        let mut check = Reader::new(&buf[Self::PAYLOAD_SIZE..]);
        if check.u32() != fnv1a(payload) {
            return None;
        }
        let mut r = Reader::new(payload);
        let serial = r.u64();
        let fs_version = r.u8();
        let params = Params::from_bytes(r.take(Params::ON_FLASH_SIZE))?;
        let chain_head = Addr::from_u64(r.u64());
        Some(AnchorEntry {
            serial,
            fs_version,
            params,
            chain_head,
        })
    }
}

/// Layer 2 (spec §4.8): points to the next jump pad, or (on the last
/// hop) to the super-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JumpPadEntry {
    serial: u64,
    next: Addr,
}

impl JumpPadEntry {
    const PAYLOAD_SIZE: usize = 8 + 8;
    const ON_FLASH_SIZE: usize = Self::PAYLOAD_SIZE + 4;

    fn to_bytes(&self, out: &mut [u8]) {
        let mut payload = [0u8; Self::PAYLOAD_SIZE];
        {
            let mut w = Writer::new(&mut payload);
            w.u64(self.serial);
            w.u64(self.next.into_u64());
        }
        let mut w = Writer::new(out);
        w.bytes(&payload);
        w.u32(fnv1a(&payload));
    }

    fn from_bytes(buf: &[u8]) -> Option<JumpPadEntry> {
        if buf.len() < Self::ON_FLASH_SIZE {
            return None;
        }
        let payload = &buf[..Self::PAYLOAD_SIZE];
        let mut check = Reader::new(&buf[Self::PAYLOAD_SIZE..]);
        if check.u32() != fnv1a(payload) {
            return None;
        }
        let mut r = Reader::new(payload);
        Some(JumpPadEntry {
            serial: r.u64(),
            next: Addr::from_u64(r.u64()),
        })
    }
}

/// A snapshot of one area map entry (spec §4.8 "full area-map
/// snapshot").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaMapSnapshot {
    pub itype: AreaType,
    pub status: AreaStatus,
    pub erase_count: u32,
    pub position: AreaPos,
}

/// Layer 3 (spec §4.8/§3): the authoritative root, found by following
/// the highest-serial anchor through its jump pads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperIndex {
    pub serial: u64,
    pub rootnode: Addr,
    pub area_map: Vec<AreaMapSnapshot>,
    /// `(type, area)` for each active area at commit time (spec §4.8
    /// `active_area[superblock|index|data]`).
    pub active_areas: Vec<(AreaType, AreaPos)>,
    /// Per-active-area compact summary (spec §4.8 step 3): one
    /// free/used bit per page, taken from
    /// [`SummaryCache::compact_bits`] at commit time so a mount can
    /// seed the cache without rescanning OOB for these areas.
    pub active_summaries: Vec<(AreaType, Vec<bool>)>,
}

impl SuperIndex {
    fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        let mut w = Writer::new(out);
        w.u64(self.serial);
        w.u64(self.rootnode.into_u64());
        w.u32(self.area_map.len() as u32);
        for a in &self.area_map {
            w.u8(a.itype.to_tag());
            w.u8(a.status.to_tag());
            w.u32(a.erase_count);
            w.u32(a.position);
        }
        w.u32(self.active_areas.len() as u32);
        for (ty, pos) in &self.active_areas {
            w.u8(ty.to_tag());
            w.u32(*pos);
        }
        w.u32(self.active_summaries.len() as u32);
        for (ty, bits) in &self.active_summaries {
            w.u8(ty.to_tag());
            w.u32(bits.len() as u32);
            w.bytes(&pack_bits(bits));
        }
        Ok(w.position())
    }

    fn decode(buf: &[u8]) -> Result<SuperIndex, Error> {
        let mut r = Reader::new(buf);
        if r.remaining() < 16 + 4 {
            return Err(Error::Bug);
        }
        let serial = r.u64();
        let rootnode = Addr::from_u64(r.u64());
        let map_len = r.u32() as usize;
        let mut area_map = Vec::with_capacity(map_len);
        for _ in 0..map_len {
            if r.remaining() < 10 {
                return Err(Error::Bug);
            }
            let itype = AreaType::from_tag(r.u8())?;
            let status = AreaStatus::from_tag(r.u8())?;
            let erase_count = r.u32();
            let position = r.u32();
            area_map.push(AreaMapSnapshot {
                itype,
                status,
                erase_count,
                position,
            });
        }
        if r.remaining() < 4 {
            return Err(Error::Bug);
        }
        let active_len = r.u32() as usize;
        let mut active_areas = Vec::with_capacity(active_len);
        for _ in 0..active_len {
            if r.remaining() < 5 {
                return Err(Error::Bug);
            }
            let ty = AreaType::from_tag(r.u8())?;
            let pos = r.u32();
            active_areas.push((ty, pos));
        }
        if r.remaining() < 4 {
            return Err(Error::Bug);
        }
        let summaries_len = r.u32() as usize;
        let mut active_summaries = Vec::with_capacity(summaries_len);
        for _ in 0..summaries_len {
            if r.remaining() < 5 {
                return Err(Error::Bug);
            }
            let ty = AreaType::from_tag(r.u8())?;
            let bit_len = r.u32() as usize;
            let byte_len = (bit_len + 7) / 8;
            if r.remaining() < byte_len {
                return Err(Error::Bug);
            }
            let bits = unpack_bits(r.take(byte_len), bit_len);
            active_summaries.push((ty, bits));
        }
        Ok(SuperIndex {
            serial,
            rootnode,
            area_map,
            active_areas,
            active_summaries,
        })
    }
}

/// Owns the chain's write cursors; rebuilt by [`SuperblockChain::format`]
/// or resumed by [`SuperblockChain::mount`].
pub struct SuperblockChain {
    anchor_block: u32,
    anchor_page: u32,
    chain_slot: u32,
    chain_line: u32,
    last_serial: u64,
}

impl SuperblockChain {
    fn entry_size_pages(derived: &Derived) -> u32 {
        derived.params.jump_pad_no + 1
    }

    fn chain_region_start_page(derived: &Derived) -> u32 {
        ANCHOR_BLOCKS * derived.params.pages_per_block
    }

    fn half_pages(derived: &Derived) -> Result<u32, Error> {
        let region_blocks = derived
            .params
            .blocks_per_area
            .checked_sub(ANCHOR_BLOCKS)
            .ok_or(Error::InvalidInput)?;
        if region_blocks < 2 || region_blocks % 2 != 0 {
            return Err(Error::InvalidInput);
        }
        let half_pages = (region_blocks / 2) * derived.params.pages_per_block;
        if half_pages < Self::entry_size_pages(derived) {
            return Err(Error::InvalidInput);
        }
        Ok(half_pages)
    }

    /// Formats a fresh chain: reserves area 0 for the superblock type
    /// (never through `find_writable_area`'s usual tie-breaking — area
    /// 0 is claimed unconditionally by convention) and writes the
    /// first anchor/jump-pad/super-index generation.
    pub fn format<D: Driver>(
        areas: &mut AreaManager,
        summary: &SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<SuperblockChain, Error> {
        Self::half_pages(derived)?;
        if areas.area(CHAIN_AREA).status != AreaStatus::Empty {
            warn!("area 0 not empty at format time");
            return Err(Error::Bug);
        }
        areas.init_area(CHAIN_AREA, AreaType::Superblock);
        let mut chain = SuperblockChain {
            anchor_block: 0,
            anchor_page: 0,
            chain_slot: 0,
            chain_line: 0,
            last_serial: 0,
        };
        chain.commit(Addr::EMPTY, areas, summary, derived, driver)?;
        Ok(chain)
    }

    /// Scans the chain at mount time: highest-serial anchor across
    /// blocks 0/1, follows it through the jump pads, and returns the
    /// resumed write state plus the authoritative [`SuperIndex`].
    pub fn mount<D: Driver>(
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(SuperblockChain, SuperIndex), Error> {
        Self::half_pages(derived)?;
        let total_anchor_pages = ANCHOR_BLOCKS * derived.params.pages_per_block;
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut best: Option<(u32, AnchorEntry)> = None;
        for page_idx in 0..total_anchor_pages {
            let mut buf = vec![0u8; page_size];
            let page_abs = derived.page_abs(CHAIN_AREA, page_idx);
            if driver.read_page(page_abs, &mut buf).into_result().is_err() {
                continue;
            }
            let Some(entry) = AnchorEntry::from_bytes(&buf) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((best_idx, best_entry)) => {
                    entry.serial > best_entry.serial
                        || (entry.serial == best_entry.serial && page_idx >= *best_idx)
                }
            };
            if better {
                best = Some((page_idx, entry));
            }
        }
        let (anchor_idx, anchor) = best.ok_or(Error::NotFound)?;
        trace!(
            "superblock: chose anchor at page {} (serial {})",
            anchor_idx,
            anchor.serial
        );
        if anchor.params != derived.params {
            warn!("superblock: on-flash parameters do not match the mount-time configuration");
            return Err(Error::InvalidInput);
        }

        let mut cursor = anchor.chain_head;
        let mut jump_pad_buf = vec![0u8; page_size];
        for _ in 0..derived.params.jump_pad_no {
            let page_abs = derived.page_abs(CHAIN_AREA, cursor.page());
            driver
                .read_page(page_abs, &mut jump_pad_buf)
                .into_result()?;
            let pad = JumpPadEntry::from_bytes(&jump_pad_buf).ok_or(Error::Bug)?;
            cursor = pad.next;
        }

        let mut index_buf = vec![0u8; page_size];
        let page_abs = derived.page_abs(CHAIN_AREA, cursor.page());
        driver.read_page(page_abs, &mut index_buf).into_result()?;
        let super_index = SuperIndex::decode(&index_buf)?;
        if super_index.serial != anchor.serial {
            warn!("superblock: super-index serial does not match its anchor");
            return Err(Error::Bug);
        }

        let region_start = Self::chain_region_start_page(derived);
        let half_pages = Self::half_pages(derived)?;
        let entry_size = Self::entry_size_pages(derived);
        let rel = anchor.chain_head.page() - region_start;
        let slot = rel / half_pages;
        let line = (rel % half_pages) / entry_size;

        let chain = SuperblockChain {
            anchor_block: anchor_idx / derived.params.pages_per_block,
            anchor_page: anchor_idx % derived.params.pages_per_block + 1,
            chain_slot: slot,
            chain_line: line + 1,
            last_serial: anchor.serial,
        };
        Ok((chain, super_index))
    }

    fn write_anchor<D: Driver>(
        &mut self,
        chain_head: Addr,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        if self.anchor_page >= derived.params.pages_per_block {
            let other_block = 1 - self.anchor_block;
            for block in Self::anchor_block_range(other_block, derived) {
                driver.erase_block(block).into_result()?;
            }
            self.anchor_block = other_block;
            self.anchor_page = 0;
        }
        let page = self.anchor_block * derived.params.pages_per_block + self.anchor_page;
        let entry = AnchorEntry {
            serial: self.last_serial,
            fs_version: 1,
            params: derived.params,
            chain_head,
        };
        let mut buf = vec![0u8; derived.params.data_bytes_per_page as usize];
        entry.to_bytes(&mut buf[..AnchorEntry::ON_FLASH_SIZE]);
        let page_abs = derived.page_abs(CHAIN_AREA, page);
        driver.write_page(page_abs, &buf).into_result()?;
        self.anchor_page += 1;
        Ok(())
    }

    fn anchor_block_range(block: u32, derived: &Derived) -> core::ops::Range<BlockAbs> {
        let area_block_start = CHAIN_AREA as BlockAbs * derived.params.blocks_per_area;
        let start = area_block_start + block;
        start..start + 1
    }

    fn chain_slot_block_range(&self, slot: u32, derived: &Derived) -> core::ops::Range<BlockAbs> {
        let region_blocks = (derived.params.blocks_per_area - ANCHOR_BLOCKS) / 2;
        let area_block_start = CHAIN_AREA as BlockAbs * derived.params.blocks_per_area;
        let start = area_block_start + ANCHOR_BLOCKS + slot * region_blocks;
        start..start + region_blocks
    }

    /// Commits a new generation of the chain: writes a fresh super-index
    /// (with `serial = last_serial + 1`), the jump pads pointing to it,
    /// and an anchor pointing at the first jump pad (spec §4.8 "Write").
    pub fn commit<D: Driver>(
        &mut self,
        rootnode: Addr,
        areas: &mut AreaManager,
        summary: &SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        let half_pages = Self::half_pages(derived)?;
        let entry_size = Self::entry_size_pages(derived);
        let lines_per_half = half_pages / entry_size;

        if self.chain_line >= lines_per_half {
            let other = 1 - self.chain_slot;
            for block in self.chain_slot_block_range(other, derived) {
                driver.erase_block(block).into_result()?;
            }
            self.chain_slot = other;
            self.chain_line = 0;
        }

        let region_start = Self::chain_region_start_page(derived);
        let line_start = region_start + self.chain_slot * half_pages + self.chain_line * entry_size;

        let area_map: Vec<AreaMapSnapshot> = areas
            .all_areas()
            .iter()
            .map(|a| AreaMapSnapshot {
                itype: a.itype,
                status: a.status,
                erase_count: a.erase_count,
                position: a.position,
            })
            .collect();
        let active_areas: Vec<(AreaType, AreaPos)> = SNAPSHOT_KINDS
            .iter()
            .filter_map(|ty| areas.active_area(*ty).map(|pos| (*ty, pos)))
            .collect();
        let active_summaries: Vec<(AreaType, Vec<bool>)> = active_areas
            .iter()
            .filter_map(|(ty, pos)| summary.compact_bits(*pos).map(|bits| (*ty, bits)))
            .collect();

        let new_serial = self.last_serial + 1;
        let super_index = SuperIndex {
            serial: new_serial,
            rootnode,
            area_map,
            active_areas,
            active_summaries,
        };

        let index_page = line_start + entry_size - 1;
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut index_buf = vec![0u8; page_size];
        let n = super_index.encode(&mut index_buf)?;
        if n > page_size {
            return Err(Error::InvalidInput);
        }
        let index_page_abs = derived.page_abs(CHAIN_AREA, index_page);
        driver.write_page(index_page_abs, &index_buf).into_result()?;

        let mut next = Addr::new(CHAIN_AREA, index_page);
        for hop in (0..derived.params.jump_pad_no).rev() {
            let pad_page = line_start + hop;
            let pad = JumpPadEntry {
                serial: new_serial,
                next,
            };
            let mut buf = vec![0u8; page_size];
            pad.to_bytes(&mut buf[..JumpPadEntry::ON_FLASH_SIZE]);
            let pad_abs = derived.page_abs(CHAIN_AREA, pad_page);
            driver.write_page(pad_abs, &buf).into_result()?;
            next = Addr::new(CHAIN_AREA, pad_page);
        }

        self.last_serial = new_serial;
        self.chain_line += 1;
        self.write_anchor(next, derived, driver)?;
        debug!("superblock: committed generation {}", new_serial);
        Ok(())
    }

    pub fn last_serial(&self) -> u64 {
        self.last_serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ram::RamDriver;

    fn params() -> Params {
        let mut p = Params::small();
        p.jump_pad_no = 2;
        p
    }

    fn setup() -> (AreaManager, SummaryCache, Derived, RamDriver) {
        let derived = params().derive().unwrap();
        let areas = AreaManager::format(derived.areas_no, derived.data_pages_per_area);
        let summary = SummaryCache::new(derived.params.area_summary_cache_size as usize);
        let driver = RamDriver::new(
            derived.params.data_bytes_per_page as usize,
            derived.params.pages_per_block as usize,
            derived.params.blocks_total as usize,
        );
        (areas, summary, derived, driver)
    }

    #[test]
    fn format_then_mount_recovers_rootnode() {
        let (mut areas, summary, derived, mut driver) = setup();
        let mut chain = SuperblockChain::format(&mut areas, &summary, &derived, &mut driver).unwrap();
        chain
            .commit(Addr::new(3, 5), &mut areas, &summary, &derived, &mut driver)
            .unwrap();

        let (_, index) = SuperblockChain::mount(&derived, &mut driver).unwrap();
        assert_eq!(index.rootnode, Addr::new(3, 5));
        assert_eq!(index.serial, chain.last_serial());
    }

    #[test]
    fn repeated_commits_keep_advancing_serial_and_stay_mountable() {
        let (mut areas, summary, derived, mut driver) = setup();
        let mut chain = SuperblockChain::format(&mut areas, &summary, &derived, &mut driver).unwrap();
        let mut last_addr = Addr::EMPTY;
        for i in 0..40u32 {
            last_addr = Addr::new(1, i);
            chain
                .commit(last_addr, &mut areas, &summary, &derived, &mut driver)
                .unwrap();
        }
        let (_, index) = SuperblockChain::mount(&derived, &mut driver).unwrap();
        assert_eq!(index.rootnode, last_addr);
        assert_eq!(index.serial, chain.last_serial());
    }

    #[test]
    fn mount_rejects_mismatched_parameters() {
        let (mut areas, summary, derived, mut driver) = setup();
        let mut chain = SuperblockChain::format(&mut areas, &summary, &derived, &mut driver).unwrap();
        chain
            .commit(Addr::new(1, 1), &mut areas, &summary, &derived, &mut driver)
            .unwrap();

        let mut other = params();
        other.max_number_of_inodes += 1;
        let other_derived = other.derive().unwrap();
        assert_eq!(
            SuperblockChain::mount(&other_derived, &mut driver).unwrap_err(),
            Error::InvalidInput
        );
    }

    #[test]
    fn area_map_and_active_areas_survive_commit_and_reload() {
        let (mut areas, summary, derived, mut driver) = setup();
        areas.init_area(2, AreaType::Data);
        let mut chain = SuperblockChain::format(&mut areas, &summary, &derived, &mut driver).unwrap();
        chain
            .commit(Addr::new(0, 0), &mut areas, &summary, &derived, &mut driver)
            .unwrap();

        let (_, index) = SuperblockChain::mount(&derived, &mut driver).unwrap();
        let snap = index
            .area_map
            .iter()
            .find(|a| a.position == 2)
            .expect("area 2 present in snapshot");
        assert_eq!(snap.itype, AreaType::Data);
        assert_eq!(snap.status, AreaStatus::Active);
        assert!(index.active_areas.contains(&(AreaType::Data, 2)));
    }

    #[test]
    fn torn_write_between_generations_leaves_previous_chain_followable() {
        let (mut areas, summary, derived, mut driver) = setup();
        let mut chain = SuperblockChain::format(&mut areas, &summary, &derived, &mut driver).unwrap();
        chain
            .commit(Addr::new(2, 2), &mut areas, &summary, &derived, &mut driver)
            .unwrap();

        // Simulate a crash mid-commit: each commit writes the
        // super-index, its jump pads and finally the anchor, in that
        // order (4 writes total with jump_pad_no = 2). Two commits have
        // already happened (format + the explicit commit above), so
        // allowing 11 more writes lets generation 3's index and jump
        // pads land but fails its anchor write.
        driver.fail_write_after = Some(11);
        let _ = chain.commit(Addr::new(9, 9), &mut areas, &summary, &derived, &mut driver);

        driver.fail_write_after = None;
        let (_, index) = SuperblockChain::mount(&derived, &mut driver).unwrap();
        assert_eq!(index.rootnode, Addr::new(2, 2));
    }
}
