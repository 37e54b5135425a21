//! Inode data model (spec §3 "Inode").
//!
//! Grounded in the teacher's `sys::inode::Inode` (fixed on-flash layout,
//! `bitflags` for the permission/type bits) but kept as a plain struct
//! rather than `#[repr(C, packed)]`: the teacher can reinterpret raw
//! disk bytes in place because its `Volume` gives it a borrowed `&[u8]`
//! to transmute, but this core's tree nodes are not naturally aligned
//! flash pages in RAM (they go through the tree cache's arena), so
//! on-flash layout is produced explicitly by [`Inode::to_bytes`] /
//! [`Inode::from_bytes`] instead of relying on struct layout. This also
//! pins the encoding to little-endian regardless of host endianness
//! (spec §9).

use crate::addr::Addr;
use core::mem::size_of;

/// Unique identifier for an inode; the B⁺-tree's key type.
pub type InodeNo = u32;

/// Number of direct address slots on an inode (spec §3).
pub const DIRECT_ADDR_COUNT: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    File,
    Dir,
    Lnk,
}

impl InodeType {
    fn to_u8(self) -> u8 {
        match self {
            InodeType::File => 0,
            InodeType::Dir => 1,
            InodeType::Lnk => 2,
        }
    }

    fn from_u8(b: u8) -> Option<InodeType> {
        match b {
            0 => Some(InodeType::File),
            1 => Some(InodeType::Dir),
            2 => Some(InodeType::Lnk),
            _ => None,
        }
    }
}

bitflags! {
    /// 3-bit rwx permission (spec §3). Only the low 3 bits are defined;
    /// on-flash storage still reserves a full byte, matching the
    /// original's `Permission perm : 3` bitfield-in-a-byte encoding.
    pub struct Permission: u8 {
        const EXEC  = 0x4;
        const WRITE = 0x2;
        const READ  = 0x1;
    }
}

/// In-memory inode record. Handed to user code as a value copy (spec §5
/// "Shared resources"); mutations must be routed back through
/// [`crate::btree::BTree::update_inode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub no: InodeNo,
    pub itype: InodeType,
    pub perm: Permission,
    /// Space reserved on the filesystem, in pages.
    pub reserved_pages: u32,
    /// Logical file size in bytes.
    pub size: u64,
    pub crea: u64,
    pub modi: u64,
    pub direct: [Addr; DIRECT_ADDR_COUNT],
    pub indir: Addr,
    pub d_indir: Addr,
    pub t_indir: Addr,
}

/// On-flash encoded size of an `Inode`, used by [`crate::config::Derived`]
/// to size B⁺-tree leaves.
pub const INODE_ON_FLASH_SIZE: usize = 4  // no
    + 1 // itype
    + 1 // perm
    + 4 // reserved_pages
    + 8 // size
    + 8 // crea
    + 8 // modi
    + DIRECT_ADDR_COUNT * size_of::<u64>()
    + 8 // indir
    + 8 // d_indir
    + 8; // t_indir

impl Inode {
    /// A fresh, empty inode with no data, as created by `insertInode` on
    /// first use (spec §3 "Lifecycle").
    pub fn new(no: InodeNo, itype: InodeType, perm: Permission, now: u64) -> Inode {
        Inode {
            no,
            itype,
            perm,
            reserved_pages: 0,
            size: 0,
            crea: now,
            modi: now,
            direct: [Addr::EMPTY; DIRECT_ADDR_COUNT],
            indir: Addr::EMPTY,
            d_indir: Addr::EMPTY,
            t_indir: Addr::EMPTY,
        }
    }

    /// Invariant from spec §3: `reserved_pages * data_bytes_per_page >= size`.
    pub fn satisfies_reservation_invariant(&self, data_bytes_per_page: u32) -> bool {
        self.reserved_pages as u64 * data_bytes_per_page as u64 >= self.size
    }

    pub fn to_bytes(&self, out: &mut [u8]) {
        assert!(out.len() >= INODE_ON_FLASH_SIZE);
        let mut w = Writer::new(out);
        w.u32(self.no);
        w.u8(self.itype.to_u8());
        w.u8(self.perm.bits());
        w.u32(self.reserved_pages);
        w.u64(self.size);
        w.u64(self.crea);
        w.u64(self.modi);
        for a in &self.direct {
            w.u64(a.into_u64());
        }
        w.u64(self.indir.into_u64());
        w.u64(self.d_indir.into_u64());
        w.u64(self.t_indir.into_u64());
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Inode> {
        if buf.len() < INODE_ON_FLASH_SIZE {
            return None;
        }
        let mut r = Reader::new(buf);
        let no = r.u32();
        let itype = InodeType::from_u8(r.u8())?;
        let perm = Permission::from_bits_truncate(r.u8());
        let reserved_pages = r.u32();
        let size = r.u64();
        let crea = r.u64();
        let modi = r.u64();
        let mut direct = [Addr::EMPTY; DIRECT_ADDR_COUNT];
        for slot in &mut direct {
            *slot = Addr::from_u64(r.u64());
        }
        let indir = Addr::from_u64(r.u64());
        let d_indir = Addr::from_u64(r.u64());
        let t_indir = Addr::from_u64(r.u64());
        Some(Inode {
            no,
            itype,
            perm,
            reserved_pages,
            size,
            crea,
            modi,
            direct,
            indir,
            d_indir,
            t_indir,
        })
    }
}

/// Minimal little-endian cursor writer, used here and by the tree node
/// and superblock (de)serialisers to keep on-flash encoding consistent
/// across the crate without pulling in `byteorder`/`serde` (the teacher
/// hand-rolls its on-disk layouts the same way via `repr(C, packed)`
/// plus `core::mem::transmute`; we avoid `transmute` since our records
/// aren't naturally page-aligned, but keep the same "no external
/// serialisation crate" posture).
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Writer<'a> {
        Writer { buf, pos: 0 }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    pub fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    pub fn take(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
