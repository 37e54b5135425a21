//! Flash journal persistence backend (spec §4.9).
//!
//! Grounded in `journalPersistence.hpp`'s `FlashPersistence`: a single
//! page-sized RAM buffer accumulates records until it is full, then is
//! committed with `writePage`; `clear` is a block erase. Unlike the
//! original's unbounded page chain, one dedicated Index-type area (spec
//! §3 "exactly one active area... for types {superblock, index, data}")
//! holds the whole log — entries never span a page boundary, a page
//! that can't fit the next record is flushed early and a fresh page
//! claimed. This bounds the journal to one area's worth of pages, which
//! is the same area budget the original reserves for it; a caller
//! seeing `Error::NoSpace` from `append_entry` must checkpoint and
//! `clear` before continuing (spec §4.9, "the journal may be
//! truncated").

use crate::addr::AreaPos;
use crate::area::{AreaManager, AreaType};
use crate::config::Derived;
use crate::driver::Driver;
use crate::error::Error;
use crate::journal::entry::{JournalEntry, MAX_ENTRY_SIZE};
use crate::summary::SummaryCache;
use crate::summary::SummaryEntry;
use alloc::vec;
use alloc::vec::Vec;

const LEN_PREFIX: usize = 2;
/// 0-length prefix terminates a page's records early (spec §4.9 entry
/// framing: "a type tag sufficient for deserialise-by-variant").
const TERMINATOR: [u8; LEN_PREFIX] = [0, 0];

pub struct FlashPersistence {
    area: Option<AreaPos>,
    write_page: u32,
    write_buf: Vec<u8>,
    write_fill: usize,
    read_page: u32,
    read_buf: Vec<u8>,
    read_pos: usize,
}

impl FlashPersistence {
    pub fn new() -> FlashPersistence {
        FlashPersistence {
            area: None,
            write_page: 0,
            write_buf: Vec::new(),
            write_fill: 0,
            read_page: 0,
            read_buf: Vec::new(),
            read_pos: 0,
        }
    }

    /// Resumes an already-existing journal area (learned from the
    /// superblock chain at mount) instead of claiming a fresh one.
    pub fn attach(&mut self, area: AreaPos) {
        self.area = Some(area);
    }

    pub fn area(&self) -> Option<AreaPos> {
        self.area
    }

    /// Finds (or resumes, via a prior [`FlashPersistence::attach`]) the
    /// area backing the log, claiming its first page the first time
    /// this instance actually needs to write. Splitting area discovery
    /// from the one-time page-0 claim lets a caller pre-attach a fixed
    /// area (`Device` reserves one outside the normal active-Index
    /// tracking, so journal pages never interleave with B+-tree node
    /// pages in the same area) without duplicating this setup.
    fn ensure_area<D: Driver>(
        &mut self,
        areas: &mut AreaManager,
        derived: &Derived,
    ) -> Result<AreaPos, Error> {
        let pos = match self.area {
            Some(pos) => pos,
            None => {
                let pos = areas.find_writable_area(AreaType::Index)?;
                self.area = Some(pos);
                pos
            }
        };
        if self.write_buf.is_empty() {
            self.write_buf = vec![0u8; derived.params.data_bytes_per_page as usize];
            self.write_page = areas.claim_page(pos).ok_or(Error::NoSpace)?;
            self.write_fill = 0;
        }
        Ok(pos)
    }

    fn flush_write_page<D: Driver>(
        &mut self,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        let pos = self.area.ok_or(Error::Bug)?;
        let page_abs = derived.page_abs(areas.area(pos).position, self.write_page);
        driver.write_page(page_abs, &self.write_buf).into_result()?;
        summary.set_page_status(pos, self.write_page, SummaryEntry::Used, areas, derived, driver)?;
        Ok(())
    }

    pub fn append_entry<D: Driver>(
        &mut self,
        entry: &JournalEntry,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<(), Error> {
        self.ensure_area::<D>(areas, derived)?;
        let mut payload = [0u8; MAX_ENTRY_SIZE];
        let n = entry.encode(&mut payload);
        let record_len = LEN_PREFIX + n;
        let page_size = self.write_buf.len();

        if self.write_fill + record_len + LEN_PREFIX > page_size {
            self.flush_write_page(areas, summary, derived, driver)?;
            let pos = self.area.ok_or(Error::Bug)?;
            self.write_page = areas.claim_page(pos).ok_or(Error::NoSpace)?;
            self.write_fill = 0;
            for b in self.write_buf.iter_mut() {
                *b = 0;
            }
        }

        self.write_buf[self.write_fill..self.write_fill + LEN_PREFIX]
            .copy_from_slice(&(n as u16).to_le_bytes());
        self.write_fill += LEN_PREFIX;
        self.write_buf[self.write_fill..self.write_fill + n].copy_from_slice(&payload[..n]);
        self.write_fill += n;

        self.flush_write_page(areas, summary, derived, driver)
    }

    /// Resets the read cursor to the start of the dedicated journal area.
    pub fn rewind(&mut self) {
        self.read_page = 0;
        self.read_buf.clear();
        self.read_pos = 0;
    }

    pub fn read_next<D: Driver>(
        &mut self,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Option<JournalEntry>, Error> {
        let Some(pos) = self.area else {
            return Ok(None);
        };
        loop {
            if self.read_buf.is_empty() {
                if self.read_page >= areas.area(pos).pages_used() {
                    return Ok(None);
                }
                let page_size = derived.params.data_bytes_per_page as usize;
                let mut buf = vec![0u8; page_size];
                let page_abs = derived.page_abs(areas.area(pos).position, self.read_page);
                driver.read_page(page_abs, &mut buf).into_result()?;
                self.read_buf = buf;
                self.read_pos = 0;
            }

            if self.read_pos + LEN_PREFIX > self.read_buf.len() {
                self.read_buf.clear();
                self.read_page += 1;
                continue;
            }
            let len_bytes: [u8; 2] = self.read_buf[self.read_pos..self.read_pos + 2]
                .try_into()
                .unwrap();
            let n = u16::from_le_bytes(len_bytes) as usize;
            if n == 0 {
                self.read_buf.clear();
                self.read_page += 1;
                continue;
            }
            let start = self.read_pos + LEN_PREFIX;
            if start + n > self.read_buf.len() {
                return Err(Error::Bug);
            }
            let (entry, consumed) = JournalEntry::decode(&self.read_buf[start..start + n])?;
            if consumed != n {
                return Err(Error::Bug);
            }
            self.read_pos = start + n;
            return Ok(Some(entry));
        }
    }

    /// Erases every block of the dedicated journal area and releases it;
    /// the next `append_entry` claims a fresh one.
    pub fn clear<D: Driver>(&mut self, areas: &mut AreaManager, derived: &Derived, driver: &mut D) -> Result<(), Error> {
        let Some(pos) = self.area else {
            return Ok(());
        };
        for block in derived.block_range(pos) {
            driver.erase_block(block).into_result()?;
        }
        areas.mark_erased(pos);
        self.area = None;
        self.write_page = 0;
        self.write_fill = 0;
        self.write_buf.clear();
        self.rewind();
        Ok(())
    }
}

impl Default for FlashPersistence {
    fn default() -> FlashPersistence {
        FlashPersistence::new()
    }
}
