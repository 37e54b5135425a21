//! On-flash B⁺-tree node layout (spec §4.5).
//!
//! Grounded in `btree.h`'s `treeNode` (a fixed `MAX_ORDER`-wide array of
//! keys plus a parallel array of either child pointers or inode
//! payloads), reworked into two explicit variants instead of one
//! leaf-or-branch struct with an `is_leaf` flag deciding how to read the
//! `pointers` array — the teacher's `Inode`/`BlockGroupDescriptor`
//! split (distinct structs, not a tagged union squeezed into one byte
//! layout) is the closer idiom here.

use crate::addr::Addr;
use crate::error::Error;
use crate::inode::{Inode, InodeNo, Reader, Writer, INODE_ON_FLASH_SIZE};
use alloc::vec::Vec;

const TAG_LEAF: u8 = 0;
const TAG_BRANCH: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// `inodes[i]` is keyed by `keys[i]`. Leaves are not linked to each
    /// other (spec §9: range scans descend from the root, not across
    /// siblings).
    Leaf {
        keys: Vec<InodeNo>,
        inodes: Vec<Inode>,
    },
    /// `children.len() == keys.len() + 1`; `children[i]` holds keys `<
    /// keys[i]`, `children[keys.len()]` holds keys `>= keys[last]`.
    Branch {
        keys: Vec<InodeNo>,
        children: Vec<Addr>,
    },
}

impl TreeNode {
    pub fn empty_leaf() -> TreeNode {
        TreeNode::Leaf {
            keys: Vec::new(),
            inodes: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    pub fn num_keys(&self) -> usize {
        match self {
            TreeNode::Leaf { keys, .. } => keys.len(),
            TreeNode::Branch { keys, .. } => keys.len(),
        }
    }

    pub fn keys(&self) -> &[InodeNo] {
        match self {
            TreeNode::Leaf { keys, .. } => keys,
            TreeNode::Branch { keys, .. } => keys,
        }
    }

    /// Encodes into `out`, which must be at least `data_bytes_per_page`
    /// long; unused tail bytes are left zeroed.
    pub fn to_bytes(&self, out: &mut [u8]) {
        for b in out.iter_mut() {
            *b = 0;
        }
        let mut w = Writer::new(out);
        match self {
            TreeNode::Leaf { keys, inodes } => {
                w.u8(TAG_LEAF);
                w.u32(keys.len() as u32);
                let mut ibuf = [0u8; INODE_ON_FLASH_SIZE];
                for (key, inode) in keys.iter().zip(inodes.iter()) {
                    w.u32(*key);
                    inode.to_bytes(&mut ibuf);
                    w.bytes(&ibuf);
                }
            }
            TreeNode::Branch { keys, children } => {
                w.u8(TAG_BRANCH);
                w.u32(keys.len() as u32);
                for key in keys {
                    w.u32(*key);
                }
                for child in children {
                    w.u64(child.into_u64());
                }
            }
        }
    }

    /// Decodes a node previously written by [`TreeNode::to_bytes`].
    /// `Error::Bug` marks on-flash corruption the caller cannot repair:
    /// a read that ECC could not correct surfaces earlier, as
    /// `BitErrorNotCorrected` from the driver, before this ever runs.
    pub fn from_bytes(buf: &[u8]) -> Result<TreeNode, Error> {
        let mut r = Reader::new(buf);
        if r.remaining() < 5 {
            return Err(Error::Bug);
        }
        let tag = r.u8();
        let num_keys = r.u32() as usize;
        match tag {
            TAG_LEAF => {
                let mut keys = Vec::with_capacity(num_keys);
                let mut inodes = Vec::with_capacity(num_keys);
                for _ in 0..num_keys {
                    if r.remaining() < 4 + INODE_ON_FLASH_SIZE {
                        return Err(Error::Bug);
                    }
                    keys.push(r.u32());
                    let inode_buf = r.take(INODE_ON_FLASH_SIZE);
                    inodes.push(Inode::from_bytes(inode_buf).ok_or(Error::Bug)?);
                }
                Ok(TreeNode::Leaf { keys, inodes })
            }
            TAG_BRANCH => {
                let mut keys = Vec::with_capacity(num_keys);
                for _ in 0..num_keys {
                    if r.remaining() < 4 {
                        return Err(Error::Bug);
                    }
                    keys.push(r.u32());
                }
                let mut children = Vec::with_capacity(num_keys + 1);
                for _ in 0..=num_keys {
                    if r.remaining() < 8 {
                        return Err(Error::Bug);
                    }
                    children.push(Addr::from_u64(r.u64()));
                }
                Ok(TreeNode::Branch { keys, children })
            }
            _ => Err(Error::Bug),
        }
    }
}
