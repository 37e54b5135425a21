//! Driver facade (spec §4.1, component A).
//!
//! Grounded in the teacher's `Volume<T, S>` trait: a small set of
//! synchronous operations a storage backend must provide, generic enough
//! that tests can swap in an in-memory double (like the teacher swaps a
//! `RefCell<File>` in under `#[cfg(test)]`) without the core depending on
//! `std`.
//!
//! The core treats every method as synchronous and blocking (spec §5:
//! no suspension point exists inside the core except at this boundary).

use crate::addr::{BlockAbs, PageAbs};
use crate::error::DriverResult;

/// Hardware-facing operations the core relies on. Implementations own
/// ECC (software Yaffs-style or hardware-mapped), ready/busy polling and
/// bus timeouts; none of that is visible here (spec §1 scope).
pub trait Driver {
    /// Write `buf` (length must be <= `total_bytes_per_page`) to
    /// `page_abs`, including OOB/ECC. Writing a page a second time before
    /// its block is erased is a contract violation — implementations may
    /// assert on it; the core never does this deliberately (`Error::Bug`
    /// if observed).
    fn write_page(&mut self, page_abs: PageAbs, buf: &[u8]) -> DriverResult;

    /// Read a page into `buf`. `DriverResult::BitErrorCorrected` is a
    /// soft warning the caller logs and continues past;
    /// `BitErrorNotCorrected` means the page's data is lost.
    fn read_page(&mut self, page_abs: PageAbs, buf: &mut [u8]) -> DriverResult;

    /// Erase every page in the block.
    fn erase_block(&mut self, block_abs: BlockAbs) -> DriverResult;

    /// Mark a block bad (convention: first two pages of the block carry
    /// the marker, `0xFF` = good).
    fn mark_bad(&mut self, block_abs: BlockAbs) -> DriverResult;

    /// Check whether a block is marked bad.
    fn check_bad(&mut self, block_abs: BlockAbs) -> bool;

    /// Optional MRAM byte-addressable backing for the journal (spec
    /// §4.9). Drivers with no MRAM return `DriverResult::Fail`; the core
    /// only calls these if the journal is configured for MRAM.
    fn write_mram(&mut self, _byte_offset: u64, _buf: &[u8]) -> DriverResult {
        DriverResult::Fail
    }

    fn read_mram(&mut self, _byte_offset: u64, _buf: &mut [u8]) -> DriverResult {
        DriverResult::Fail
    }

    /// Whether this driver backs the journal with MRAM. The journal
    /// consults this once at mount to pick its persistence strategy.
    fn has_mram(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub mod ram {
    //! In-memory `Driver` double, analogous to the teacher's
    //! `RefCell<File>` `Volume` impl under `#[cfg(test)]`. Lives behind
    //! `#[cfg(test)]` here too since nothing outside this crate's own
    //! tests should depend on it; integration tests re-implement their
    //! own copy against the public `Driver` trait (see `tests/common`).
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    pub struct RamDriver {
        pub page_size: usize,
        pub pages_per_block: usize,
        pub blocks: usize,
        pages: Vec<Option<Vec<u8>>>,
        bad: Vec<bool>,
        pub fail_write_after: Option<usize>,
        writes_seen: usize,
        mram: Option<Vec<u8>>,
    }

    impl RamDriver {
        pub fn new(page_size: usize, pages_per_block: usize, blocks: usize) -> RamDriver {
            RamDriver {
                page_size,
                pages_per_block,
                blocks,
                pages: vec![None; pages_per_block * blocks],
                bad: vec![false; blocks],
                fail_write_after: None,
                writes_seen: 0,
                mram: None,
            }
        }

        /// Enables the optional MRAM backing (spec §4.1), zero-initialised
        /// as real MRAM reads as after a fresh part.
        pub fn with_mram(mut self, bytes: usize) -> RamDriver {
            self.mram = Some(vec![0u8; bytes]);
            self
        }
    }

    impl Driver for RamDriver {
        fn write_page(&mut self, page_abs: PageAbs, buf: &[u8]) -> DriverResult {
            self.writes_seen += 1;
            if let Some(n) = self.fail_write_after {
                if self.writes_seen > n {
                    return DriverResult::Fail;
                }
            }
            let idx = page_abs as usize;
            if idx >= self.pages.len() || buf.len() > self.page_size {
                return DriverResult::Fail;
            }
            if self.pages[idx].is_some() {
                return DriverResult::Fail;
            }
            let mut data = vec![0u8; self.page_size];
            data[..buf.len()].copy_from_slice(buf);
            self.pages[idx] = Some(data);
            DriverResult::Ok
        }

        fn read_page(&mut self, page_abs: PageAbs, buf: &mut [u8]) -> DriverResult {
            let idx = page_abs as usize;
            match self.pages.get(idx) {
                Some(Some(data)) => {
                    let n = buf.len().min(data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    DriverResult::Ok
                }
                Some(None) => {
                    for b in buf.iter_mut() {
                        *b = 0;
                    }
                    DriverResult::Ok
                }
                None => DriverResult::Fail,
            }
        }

        fn erase_block(&mut self, block_abs: BlockAbs) -> DriverResult {
            let block = block_abs as usize;
            if block >= self.blocks {
                return DriverResult::Fail;
            }
            let start = block * self.pages_per_block;
            for p in &mut self.pages[start..start + self.pages_per_block] {
                *p = None;
            }
            DriverResult::Ok
        }

        fn mark_bad(&mut self, block_abs: BlockAbs) -> DriverResult {
            self.bad[block_abs as usize] = true;
            DriverResult::Ok
        }

        fn check_bad(&mut self, block_abs: BlockAbs) -> bool {
            self.bad[block_abs as usize]
        }

        fn write_mram(&mut self, byte_offset: u64, buf: &[u8]) -> DriverResult {
            let Some(mram) = self.mram.as_mut() else {
                return DriverResult::Fail;
            };
            let start = byte_offset as usize;
            let end = start + buf.len();
            if end > mram.len() {
                return DriverResult::Fail;
            }
            mram[start..end].copy_from_slice(buf);
            DriverResult::Ok
        }

        fn read_mram(&mut self, byte_offset: u64, buf: &mut [u8]) -> DriverResult {
            let Some(mram) = self.mram.as_ref() else {
                return DriverResult::Fail;
            };
            let start = byte_offset as usize;
            let end = start + buf.len();
            if end > mram.len() {
                return DriverResult::Fail;
            }
            buf.copy_from_slice(&mram[start..end]);
            DriverResult::Ok
        }

        fn has_mram(&self) -> bool {
            self.mram.is_some()
        }
    }
}
