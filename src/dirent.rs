//! Directory entry byte-stream codec (spec §3 "Directory entries").
//!
//! A directory inode's data is a byte stream: a 16-bit entry count
//! followed by variable-length records of
//! `entryLength:u8 | inodeNo:u32 | nameBytes[entryLength-5]`. This is
//! the data-model piece of the directory API the spec keeps in scope
//! even though `mkDir`/`opendir`/`readdir` themselves are not (spec §1,
//! SPEC_FULL.md "Supplemented features").

use crate::inode::InodeNo;
use alloc::string::String;
use alloc::vec::Vec;

pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode_no: InodeNo,
    pub name: String,
}

impl DirEntry {
    /// Total on-the-wire length of this entry's record, including its
    /// own 1-byte length prefix.
    fn record_len(&self) -> usize {
        1 + 4 + self.name.len()
    }
}

/// Encode a full directory listing into the byte stream stored as a
/// directory inode's data.
pub fn encode(entries: &[DirEntry]) -> Result<Vec<u8>, crate::error::Error> {
    if entries.len() > u16::MAX as usize {
        return Err(crate::error::Error::InvalidInput);
    }
    let mut out = Vec::with_capacity(2);
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for e in entries {
        if e.name.len() > MAX_NAME_LEN || e.name.is_empty() {
            return Err(crate::error::Error::NameTooLong);
        }
        let entry_length = e.record_len();
        if entry_length > u8::MAX as usize {
            return Err(crate::error::Error::NameTooLong);
        }
        out.push(entry_length as u8);
        out.extend_from_slice(&e.inode_no.to_le_bytes());
        out.extend_from_slice(e.name.as_bytes());
    }
    Ok(out)
}

/// Decode a directory's byte stream back into entries. Malformed input
/// (truncated record, length shorter than the 5-byte header) is a
/// `Bug`: it means the tree/data-I/O layers disagree about what was
/// written, which should never happen absent flash corruption (which
/// itself surfaces earlier, as `BitErrorNotCorrected` from the driver).
pub fn decode(buf: &[u8]) -> Result<Vec<DirEntry>, crate::error::Error> {
    if buf.len() < 2 {
        return Err(crate::error::Error::Bug);
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let mut entries = Vec::with_capacity(count);
    let mut pos = 2usize;
    for _ in 0..count {
        if pos >= buf.len() {
            return Err(crate::error::Error::Bug);
        }
        let entry_length = buf[pos] as usize;
        if entry_length < 5 || pos + entry_length > buf.len() {
            return Err(crate::error::Error::Bug);
        }
        let inode_no = u32::from_le_bytes([
            buf[pos + 1],
            buf[pos + 2],
            buf[pos + 3],
            buf[pos + 4],
        ]);
        let name_bytes = &buf[pos + 5..pos + entry_length];
        let name = core::str::from_utf8(name_bytes)
            .map_err(|_| crate::error::Error::Bug)?
            .into();
        entries.push(DirEntry { inode_no, name });
        pos += entry_length;
    }
    Ok(entries)
}
