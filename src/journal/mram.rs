//! MRAM journal persistence backend (spec §4.9).
//!
//! Grounded in `journalPersistence.hpp`'s `MramPersistence`: a single
//! monotonically increasing byte cursor (`curr`) over a byte-addressable
//! region, with no page structure to worry about. Every record is
//! framed as `len: u16` followed by `len` bytes of encoded
//! [`JournalEntry`]; a `len` of `0` is the "nothing written here yet"
//! sentinel a fresh or cleared MRAM region reads as.

use crate::driver::Driver;
use crate::error::Error;
use crate::journal::entry::{JournalEntry, MAX_ENTRY_SIZE};

const LEN_PREFIX: u64 = 2;

/// Byte-cursor persistence over `Driver::{read,write}_mram`.
pub struct MramPersistence {
    capacity: u64,
    write_cursor: u64,
    read_cursor: u64,
}

impl MramPersistence {
    pub fn new(capacity_bytes: u64) -> MramPersistence {
        MramPersistence {
            capacity: capacity_bytes,
            write_cursor: 0,
            read_cursor: 0,
        }
    }

    /// Resets the read cursor to the start of the log, ready for
    /// `read_next` to scan forward (spec §4.9 "rewind has to be called
    /// before scanning elements").
    pub fn rewind(&mut self) {
        self.read_cursor = 0;
    }

    /// After a full `rewind` + `read_next` scan hits the end of the log,
    /// resumes writing there instead of overwriting replayed entries.
    pub fn resume_writing_after_scan(&mut self) {
        self.write_cursor = self.read_cursor;
    }

    pub fn tell(&self) -> u64 {
        self.write_cursor
    }

    pub fn append_entry<D: Driver>(
        &mut self,
        entry: &JournalEntry,
        driver: &mut D,
    ) -> Result<(), Error> {
        let mut payload = [0u8; MAX_ENTRY_SIZE];
        let n = entry.encode(&mut payload);
        if self.write_cursor + LEN_PREFIX + n as u64 > self.capacity {
            return Err(Error::NoSpace);
        }
        let len_bytes = (n as u16).to_le_bytes();
        if driver
            .write_mram(self.write_cursor, &len_bytes)
            .into_result()
            .is_err()
        {
            return Err(Error::BadFlash);
        }
        if driver
            .write_mram(self.write_cursor + LEN_PREFIX, &payload[..n])
            .into_result()
            .is_err()
        {
            return Err(Error::BadFlash);
        }
        self.write_cursor += LEN_PREFIX + n as u64;
        Ok(())
    }

    /// Reads the next entry after `rewind`, or `Ok(None)` once the
    /// length-prefix sentinel (`0`) is hit.
    pub fn read_next<D: Driver>(&mut self, driver: &mut D) -> Result<Option<JournalEntry>, Error> {
        if self.read_cursor + LEN_PREFIX > self.capacity {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 2];
        if driver
            .read_mram(self.read_cursor, &mut len_bytes)
            .into_result()
            .is_err()
        {
            return Err(Error::BadFlash);
        }
        let n = u16::from_le_bytes(len_bytes) as usize;
        if n == 0 {
            return Ok(None);
        }
        let mut payload = [0u8; MAX_ENTRY_SIZE];
        if driver
            .read_mram(self.read_cursor + LEN_PREFIX, &mut payload[..n])
            .into_result()
            .is_err()
        {
            return Err(Error::BadFlash);
        }
        let (entry, consumed) = JournalEntry::decode(&payload[..n])?;
        if consumed != n {
            return Err(Error::Bug);
        }
        self.read_cursor += LEN_PREFIX + n as u64;
        Ok(Some(entry))
    }

    /// Truncates the log: rewinds both cursors and stamps a fresh
    /// sentinel at offset zero so a subsequent `read_next` after
    /// `rewind` immediately reports an empty log.
    pub fn clear<D: Driver>(&mut self, driver: &mut D) -> Result<(), Error> {
        let zero = [0u8; 2];
        if driver.write_mram(0, &zero).into_result().is_err() {
            return Err(Error::BadFlash);
        }
        self.write_cursor = 0;
        self.read_cursor = 0;
        Ok(())
    }
}
