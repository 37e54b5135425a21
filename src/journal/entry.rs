//! Journal entry taxonomy (spec §4.9, component I).
//!
//! Grounded in `journalEntry.hpp`'s `Topic` enum and its per-topic
//! subclass hierarchy (`superblock::{Rootnode, AreaMap::*, ActiveArea,
//! UsedAreas}`, `btree::{Insert, Update, Remove}`,
//! `summaryCache::{Commit, Remove, SetStatus}`,
//! `inode::{Add, Write, Remove, Commit}`), flattened into one tagged
//! `enum` instead of a class hierarchy plus `union Max` — Rust's enum
//! already is the bounded tagged union the C++ `Max` unions exist to
//! fake.

use crate::addr::{Addr, AreaPos};
use crate::area::{AreaStatus, AreaType};
use crate::error::Error;
use crate::inode::{Inode, InodeNo, Reader, Writer, INODE_ON_FLASH_SIZE};
use crate::summary::SummaryEntry;

/// Which component owns replaying a given entry (`journalEntry.hpp`'s
/// `Topic`). `Checkpoint` and `Success` are framing entries, not owned
/// by any replaying component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Checkpoint,
    Success,
    Superblock,
    Tree,
    SummaryCache,
    Inode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaMapOp {
    Type(AreaType),
    Status(AreaStatus),
    IncreaseErasecount,
    Position(AreaPos),
    Swap(AreaPos),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperblockEntry {
    Rootnode(Addr),
    AreaMap { offs: AreaPos, op: AreaMapOp },
    ActiveArea { ty: AreaType, area: AreaPos },
    UsedAreas(AreaPos),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    Insert(Inode),
    Update(Inode),
    Remove(InodeNo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryCacheEntry {
    Commit(AreaPos),
    Remove(AreaPos),
    SetStatus {
        area: AreaPos,
        page: u32,
        status: SummaryEntry,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeEntry {
    Add(InodeNo),
    Write(InodeNo),
    Remove(InodeNo),
    Commit(InodeNo),
}

/// One record in the journal's write-ordered log. `Success` marks that
/// `target`'s contribution to the most recent checkpoint is durably on
/// flash; once both `Superblock` and `Tree` have succeeded for the same
/// checkpoint, everything before it is dead weight (spec §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Checkpoint,
    Success { target: Topic },
    Superblock(SuperblockEntry),
    Tree(TreeEntry),
    SummaryCache(SummaryCacheEntry),
    Inode(InodeEntry),
}

impl JournalEntry {
    pub fn topic(&self) -> Topic {
        match self {
            JournalEntry::Checkpoint => Topic::Checkpoint,
            JournalEntry::Success { .. } => Topic::Success,
            JournalEntry::Superblock(_) => Topic::Superblock,
            JournalEntry::Tree(_) => Topic::Tree,
            JournalEntry::SummaryCache(_) => Topic::SummaryCache,
            JournalEntry::Inode(_) => Topic::Inode,
        }
    }
}

const TAG_CHECKPOINT: u8 = 0;
const TAG_SUCCESS: u8 = 1;
const TAG_SB_ROOTNODE: u8 = 2;
const TAG_SB_AREAMAP_TYPE: u8 = 3;
const TAG_SB_AREAMAP_STATUS: u8 = 4;
const TAG_SB_AREAMAP_ERASECOUNT: u8 = 5;
const TAG_SB_AREAMAP_POSITION: u8 = 6;
const TAG_SB_AREAMAP_SWAP: u8 = 7;
const TAG_SB_ACTIVE_AREA: u8 = 8;
const TAG_SB_USED_AREAS: u8 = 9;
const TAG_TREE_INSERT: u8 = 10;
const TAG_TREE_UPDATE: u8 = 11;
const TAG_TREE_REMOVE: u8 = 12;
const TAG_SC_COMMIT: u8 = 13;
const TAG_SC_REMOVE: u8 = 14;
const TAG_SC_SET_STATUS: u8 = 15;
const TAG_INODE_ADD: u8 = 16;
const TAG_INODE_WRITE: u8 = 17;
const TAG_INODE_REMOVE: u8 = 18;
const TAG_INODE_COMMIT: u8 = 19;

fn topic_tag(t: Topic) -> u8 {
    match t {
        Topic::Checkpoint => 0,
        Topic::Success => 1,
        Topic::Superblock => 2,
        Topic::Tree => 3,
        Topic::SummaryCache => 4,
        Topic::Inode => 5,
    }
}

fn topic_from_tag(v: u8) -> Result<Topic, Error> {
    Ok(match v {
        0 => Topic::Checkpoint,
        1 => Topic::Success,
        2 => Topic::Superblock,
        3 => Topic::Tree,
        4 => Topic::SummaryCache,
        5 => Topic::Inode,
        _ => return Err(Error::Bug),
    })
}

fn summary_entry_tag(s: SummaryEntry) -> u8 {
    match s {
        SummaryEntry::Free => 0,
        SummaryEntry::Used => 1,
        SummaryEntry::Dirty => 2,
        SummaryEntry::Error => 3,
    }
}

fn summary_entry_from_tag(v: u8) -> Result<SummaryEntry, Error> {
    Ok(match v {
        0 => SummaryEntry::Free,
        1 => SummaryEntry::Used,
        2 => SummaryEntry::Dirty,
        3 => SummaryEntry::Error,
        _ => return Err(Error::Bug),
    })
}

/// Upper bound on one entry's encoded size (stands in for the C++
/// `sizeof(Max)` tagged union, spec §4.9). An inode payload is the
/// largest variant.
pub const MAX_ENTRY_SIZE: usize = 1 + 4 + INODE_ON_FLASH_SIZE + 8;

impl JournalEntry {
    /// Encodes into `out` (must be at least [`MAX_ENTRY_SIZE`] long) and
    /// returns the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let mut w = Writer::new(out);
        match self {
            JournalEntry::Checkpoint => w.u8(TAG_CHECKPOINT),
            JournalEntry::Success { target } => {
                w.u8(TAG_SUCCESS);
                w.u8(topic_tag(*target));
            }
            JournalEntry::Superblock(SuperblockEntry::Rootnode(addr)) => {
                w.u8(TAG_SB_ROOTNODE);
                w.u64(addr.into_u64());
            }
            JournalEntry::Superblock(SuperblockEntry::AreaMap { offs, op }) => match op {
                AreaMapOp::Type(ty) => {
                    w.u8(TAG_SB_AREAMAP_TYPE);
                    w.u32(*offs);
                    w.u8(ty.to_tag());
                }
                AreaMapOp::Status(st) => {
                    w.u8(TAG_SB_AREAMAP_STATUS);
                    w.u32(*offs);
                    w.u8(st.to_tag());
                }
                AreaMapOp::IncreaseErasecount => {
                    w.u8(TAG_SB_AREAMAP_ERASECOUNT);
                    w.u32(*offs);
                }
                AreaMapOp::Position(pos) => {
                    w.u8(TAG_SB_AREAMAP_POSITION);
                    w.u32(*offs);
                    w.u32(*pos);
                }
                AreaMapOp::Swap(b) => {
                    w.u8(TAG_SB_AREAMAP_SWAP);
                    w.u32(*offs);
                    w.u32(*b);
                }
            },
            JournalEntry::Superblock(SuperblockEntry::ActiveArea { ty, area }) => {
                w.u8(TAG_SB_ACTIVE_AREA);
                w.u8(ty.to_tag());
                w.u32(*area);
            }
            JournalEntry::Superblock(SuperblockEntry::UsedAreas(n)) => {
                w.u8(TAG_SB_USED_AREAS);
                w.u32(*n);
            }
            JournalEntry::Tree(TreeEntry::Insert(inode)) => {
                w.u8(TAG_TREE_INSERT);
                let mut buf = [0u8; INODE_ON_FLASH_SIZE];
                inode.to_bytes(&mut buf);
                w.bytes(&buf);
            }
            JournalEntry::Tree(TreeEntry::Update(inode)) => {
                w.u8(TAG_TREE_UPDATE);
                let mut buf = [0u8; INODE_ON_FLASH_SIZE];
                inode.to_bytes(&mut buf);
                w.bytes(&buf);
            }
            JournalEntry::Tree(TreeEntry::Remove(no)) => {
                w.u8(TAG_TREE_REMOVE);
                w.u32(*no);
            }
            JournalEntry::SummaryCache(SummaryCacheEntry::Commit(area)) => {
                w.u8(TAG_SC_COMMIT);
                w.u32(*area);
            }
            JournalEntry::SummaryCache(SummaryCacheEntry::Remove(area)) => {
                w.u8(TAG_SC_REMOVE);
                w.u32(*area);
            }
            JournalEntry::SummaryCache(SummaryCacheEntry::SetStatus {
                area,
                page,
                status,
            }) => {
                w.u8(TAG_SC_SET_STATUS);
                w.u32(*area);
                w.u32(*page);
                w.u8(summary_entry_tag(*status));
            }
            JournalEntry::Inode(InodeEntry::Add(no)) => {
                w.u8(TAG_INODE_ADD);
                w.u32(*no);
            }
            JournalEntry::Inode(InodeEntry::Write(no)) => {
                w.u8(TAG_INODE_WRITE);
                w.u32(*no);
            }
            JournalEntry::Inode(InodeEntry::Remove(no)) => {
                w.u8(TAG_INODE_REMOVE);
                w.u32(*no);
            }
            JournalEntry::Inode(InodeEntry::Commit(no)) => {
                w.u8(TAG_INODE_COMMIT);
                w.u32(*no);
            }
        }
        w.position()
    }

    /// Decodes one entry from the front of `buf`, returning the entry
    /// and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(JournalEntry, usize), Error> {
        let mut r = Reader::new(buf);
        if r.remaining() < 1 {
            return Err(Error::Bug);
        }
        let tag = r.u8();
        let entry = match tag {
            TAG_CHECKPOINT => JournalEntry::Checkpoint,
            TAG_SUCCESS => {
                if r.remaining() < 1 {
                    return Err(Error::Bug);
                }
                JournalEntry::Success {
                    target: topic_from_tag(r.u8())?,
                }
            }
            TAG_SB_ROOTNODE => {
                if r.remaining() < 8 {
                    return Err(Error::Bug);
                }
                JournalEntry::Superblock(SuperblockEntry::Rootnode(Addr::from_u64(r.u64())))
            }
            TAG_SB_AREAMAP_TYPE => {
                if r.remaining() < 5 {
                    return Err(Error::Bug);
                }
                let offs = r.u32();
                let ty = AreaType::from_tag(r.u8())?;
                JournalEntry::Superblock(SuperblockEntry::AreaMap {
                    offs,
                    op: AreaMapOp::Type(ty),
                })
            }
            TAG_SB_AREAMAP_STATUS => {
                if r.remaining() < 5 {
                    return Err(Error::Bug);
                }
                let offs = r.u32();
                let st = AreaStatus::from_tag(r.u8())?;
                JournalEntry::Superblock(SuperblockEntry::AreaMap {
                    offs,
                    op: AreaMapOp::Status(st),
                })
            }
            TAG_SB_AREAMAP_ERASECOUNT => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                let offs = r.u32();
                JournalEntry::Superblock(SuperblockEntry::AreaMap {
                    offs,
                    op: AreaMapOp::IncreaseErasecount,
                })
            }
            TAG_SB_AREAMAP_POSITION => {
                if r.remaining() < 8 {
                    return Err(Error::Bug);
                }
                let offs = r.u32();
                let pos = r.u32();
                JournalEntry::Superblock(SuperblockEntry::AreaMap {
                    offs,
                    op: AreaMapOp::Position(pos),
                })
            }
            TAG_SB_AREAMAP_SWAP => {
                if r.remaining() < 8 {
                    return Err(Error::Bug);
                }
                let offs = r.u32();
                let b = r.u32();
                JournalEntry::Superblock(SuperblockEntry::AreaMap {
                    offs,
                    op: AreaMapOp::Swap(b),
                })
            }
            TAG_SB_ACTIVE_AREA => {
                if r.remaining() < 5 {
                    return Err(Error::Bug);
                }
                let ty = AreaType::from_tag(r.u8())?;
                let area = r.u32();
                JournalEntry::Superblock(SuperblockEntry::ActiveArea { ty, area })
            }
            TAG_SB_USED_AREAS => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Superblock(SuperblockEntry::UsedAreas(r.u32()))
            }
            TAG_TREE_INSERT => {
                if r.remaining() < INODE_ON_FLASH_SIZE {
                    return Err(Error::Bug);
                }
                let inode = Inode::from_bytes(r.take(INODE_ON_FLASH_SIZE)).ok_or(Error::Bug)?;
                JournalEntry::Tree(TreeEntry::Insert(inode))
            }
            TAG_TREE_UPDATE => {
                if r.remaining() < INODE_ON_FLASH_SIZE {
                    return Err(Error::Bug);
                }
                let inode = Inode::from_bytes(r.take(INODE_ON_FLASH_SIZE)).ok_or(Error::Bug)?;
                JournalEntry::Tree(TreeEntry::Update(inode))
            }
            TAG_TREE_REMOVE => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Tree(TreeEntry::Remove(r.u32()))
            }
            TAG_SC_COMMIT => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::SummaryCache(SummaryCacheEntry::Commit(r.u32()))
            }
            TAG_SC_REMOVE => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::SummaryCache(SummaryCacheEntry::Remove(r.u32()))
            }
            TAG_SC_SET_STATUS => {
                if r.remaining() < 9 {
                    return Err(Error::Bug);
                }
                let area = r.u32();
                let page = r.u32();
                let status = summary_entry_from_tag(r.u8())?;
                JournalEntry::SummaryCache(SummaryCacheEntry::SetStatus { area, page, status })
            }
            TAG_INODE_ADD => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Inode(InodeEntry::Add(r.u32()))
            }
            TAG_INODE_WRITE => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Inode(InodeEntry::Write(r.u32()))
            }
            TAG_INODE_REMOVE => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Inode(InodeEntry::Remove(r.u32()))
            }
            TAG_INODE_COMMIT => {
                if r.remaining() < 4 {
                    return Err(Error::Bug);
                }
                JournalEntry::Inode(InodeEntry::Commit(r.u32()))
            }
            _ => return Err(Error::Bug),
        };
        Ok((entry, r.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::{InodeType, Permission};

    fn roundtrip(entry: JournalEntry) {
        let mut buf = [0u8; MAX_ENTRY_SIZE];
        let n = entry.encode(&mut buf);
        let (decoded, consumed) = JournalEntry::decode(&buf[..n]).unwrap();
        assert_eq!(consumed, n);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn checkpoint_and_success_roundtrip() {
        roundtrip(JournalEntry::Checkpoint);
        roundtrip(JournalEntry::Success {
            target: Topic::Superblock,
        });
    }

    #[test]
    fn superblock_variants_roundtrip() {
        roundtrip(JournalEntry::Superblock(SuperblockEntry::Rootnode(
            Addr::new(2, 5),
        )));
        roundtrip(JournalEntry::Superblock(SuperblockEntry::AreaMap {
            offs: 3,
            op: AreaMapOp::Swap(7),
        }));
        roundtrip(JournalEntry::Superblock(SuperblockEntry::ActiveArea {
            ty: AreaType::Data,
            area: 4,
        }));
        roundtrip(JournalEntry::Superblock(SuperblockEntry::UsedAreas(9)));
    }

    #[test]
    fn tree_insert_roundtrip_carries_full_inode() {
        let inode = Inode::new(42, InodeType::File, Permission::all(), 100);
        roundtrip(JournalEntry::Tree(TreeEntry::Insert(inode)));
        roundtrip(JournalEntry::Tree(TreeEntry::Remove(42)));
    }

    #[test]
    fn summary_cache_set_status_roundtrip() {
        roundtrip(JournalEntry::SummaryCache(SummaryCacheEntry::SetStatus {
            area: 1,
            page: 6,
            status: SummaryEntry::Dirty,
        }));
    }

    #[test]
    fn inode_entries_roundtrip() {
        roundtrip(JournalEntry::Inode(InodeEntry::Add(11)));
        roundtrip(JournalEntry::Inode(InodeEntry::Commit(11)));
    }
}
