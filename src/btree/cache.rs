//! Tree cache: the RAM arena the B⁺-tree operates on (spec §4.5 "Tree
//! cache node").
//!
//! Grounded in the teacher's `Volume`/`Buffer` split generalised the
//! same way [`crate::summary::SummaryCache`] generalises it: nodes are
//! RAM-resident [`CachedNode`] twins of an on-flash [`TreeNode`], with a
//! back-pointer to their parent and a dirty flag; an on-flash copy is
//! immutable once written; a dirty node's Addr is only assigned when it
//! is finally flushed (copy-on-write, spec §4.5 "Persistence").
//!
//! A node created by a split has nowhere on flash yet, but its parent's
//! child-pointer slot still needs *something* to identify it by until
//! the next flush. We hand it a placeholder `Addr` in area 0 — area 0
//! is permanently `AreaType::Superblock` from the moment the device is
//! formatted (spec §3 "Superblock chain"), so it can never collide with
//! a real index-area Addr, and [`TreeCache::persist`] exchanges it for
//! a real one without the rest of the tree ever noticing the swap.

use crate::addr::Addr;
use crate::area::{AreaManager, AreaType};
use crate::config::Derived;
use crate::driver::Driver;
use crate::error::Error;
use crate::summary::SummaryCache;
use alloc::collections::BTreeMap;
use log::{debug, trace, warn};

use super::node::TreeNode;

pub type NodeId = u64;

const PENDING_AREA: u32 = 0;

pub(super) struct CachedNode {
    pub node: TreeNode,
    pub parent: Option<NodeId>,
    pub addr: Addr,
    pub dirty: bool,
    last_touch: u64,
}

impl CachedNode {
    fn is_pending(&self) -> bool {
        self.addr.area() == PENDING_AREA
    }
}

/// Bounded arena of [`CachedNode`]s, keyed both by an in-RAM [`NodeId`]
/// (stable across a node's lifetime, including splits that give it a
/// new Addr) and, once flushed, by its on-flash [`Addr`] so a repeat
/// load of the same node returns the cached copy instead of duplicating
/// it (spec §4.5 "the cache exclusively owns all resident tree nodes").
pub(super) struct TreeCache {
    capacity: usize,
    nodes: BTreeMap<NodeId, CachedNode>,
    by_addr: BTreeMap<Addr, NodeId>,
    next_id: NodeId,
    next_pending_page: u32,
    clock: u64,
}

impl TreeCache {
    pub fn new(capacity: usize) -> TreeCache {
        TreeCache {
            capacity,
            nodes: BTreeMap::new(),
            by_addr: BTreeMap::new(),
            next_id: 0,
            next_pending_page: 0,
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&self, id: NodeId) -> &TreeNode {
        &self.nodes.get(&id).expect("stale NodeId").node
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut TreeNode {
        let touch = self.tick();
        let entry = self.nodes.get_mut(&id).expect("stale NodeId");
        entry.last_touch = touch;
        entry.dirty = true;
        &mut entry.node
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.parent = parent;
        }
    }

    pub fn addr_of(&self, id: NodeId) -> Addr {
        self.nodes.get(&id).expect("stale NodeId").addr
    }

    /// The Addr is only meaningful once the node is durable; a pending
    /// (area-0) Addr means the node has never been flushed.
    pub fn is_durable(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| !n.is_pending()).unwrap_or(false)
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.dirty).unwrap_or(false)
    }

    /// Marks `id` and every ancestor up to the root dirty (spec §4.5:
    /// "the update propagates to the root"). The root's parent points
    /// to itself, so the walk terminates there.
    pub fn mark_dirty_to_root(&mut self, mut id: NodeId) {
        loop {
            let parent = match self.nodes.get_mut(&id) {
                Some(n) => {
                    n.dirty = true;
                    n.parent
                }
                None => return,
            };
            match parent {
                Some(p) if p != id => id = p,
                _ => break,
            }
        }
    }

    /// Inserts a brand-new, never-flushed node (created by a split or
    /// the very first leaf of an empty tree) and returns its id, along
    /// with the placeholder Addr that identifies it until persisted.
    pub fn insert_new(&mut self, node: TreeNode, parent: Option<NodeId>) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        let addr = Addr::new(PENDING_AREA, self.next_pending_page);
        self.next_pending_page += 1;
        let touch = self.tick();
        self.nodes.insert(
            id,
            CachedNode {
                node,
                parent,
                addr,
                dirty: true,
                last_touch: touch,
            },
        );
        self.by_addr.insert(addr, id);
        id
    }

    pub fn node_at_addr(&self, addr: Addr) -> Option<NodeId> {
        self.by_addr.get(&addr).copied()
    }

    /// Loads the node at `addr` into the cache (or returns the existing
    /// entry if already resident), evicting if necessary to make room.
    pub fn load<D: Driver>(
        &mut self,
        addr: Addr,
        parent: Option<NodeId>,
        areas: &AreaManager,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<NodeId, Error> {
        if let Some(&id) = self.by_addr.get(&addr) {
            let touch = self.tick();
            if let Some(n) = self.nodes.get_mut(&id) {
                n.last_touch = touch;
            }
            return Ok(id);
        }
        self.make_room()?;
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut buf = alloc::vec![0u8; page_size];
        let position = areas.area(addr.area()).position;
        let page_abs = derived.page_abs(position, addr.page());
        driver.read_page(page_abs, &mut buf).into_result()?;
        let node = TreeNode::from_bytes(&buf)?;
        let id = self.next_id;
        self.next_id += 1;
        let touch = self.tick();
        self.nodes.insert(
            id,
            CachedNode {
                node,
                parent,
                addr,
                dirty: false,
                last_touch: touch,
            },
        );
        self.by_addr.insert(addr, id);
        trace!("tree cache loaded node at {} as id {}", addr, id);
        Ok(id)
    }

    /// Writes `id` copy-on-write into a fresh index-area page, exchanges
    /// its (possibly placeholder) Addr for the real one and clears its
    /// dirty flag. Does not touch the parent's child pointer; callers
    /// update that separately once they know the new Addr (see
    /// `BTree::flush_all`).
    pub fn persist<D: Driver>(
        &mut self,
        id: NodeId,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Addr, Error> {
        let old = self.nodes.get(&id).expect("stale NodeId").addr;
        let was_durable = old.area() != PENDING_AREA;

        let area_pos = areas.find_writable_area(AreaType::Index)?;
        let page = areas.claim_page(area_pos).ok_or(Error::NoSpace)?;
        if !summary.is_cached(area_pos) {
            summary.load_area_summary(area_pos, areas, derived, driver)?;
        }
        let new_addr = Addr::new(area_pos, page);
        let page_size = derived.params.data_bytes_per_page as usize;
        let mut buf = alloc::vec![0u8; page_size];
        self.nodes.get(&id).expect("stale NodeId").node.to_bytes(&mut buf);
        let page_abs = derived.page_abs(areas.area(area_pos).position, page);
        driver.write_page(page_abs, &buf).into_result()?;
        summary.set_page_status(
            area_pos,
            page,
            crate::summary::SummaryEntry::Used,
            areas,
            derived,
            driver,
        )?;

        if was_durable {
            if !summary.is_cached(old.area()) {
                summary.load_area_summary(old.area(), areas, derived, driver)?;
            }
            summary.set_page_status(
                old.area(),
                old.page(),
                crate::summary::SummaryEntry::Dirty,
                areas,
                derived,
                driver,
            )?;
        }
        self.by_addr.remove(&old);

        let entry = self.nodes.get_mut(&id).expect("stale NodeId");
        entry.addr = new_addr;
        entry.dirty = false;
        self.by_addr.insert(new_addr, id);
        debug!("tree cache flushed node {} to {}", id, new_addr);
        Ok(new_addr)
    }

    /// Post-order walk (children before parents) of everything dirty
    /// and reachable from `root`, persisting bottom-up and rewriting
    /// each parent's child Addr to match. Mirrors the original's
    /// `treequeue` walk, but ordered so a child is always durable
    /// before its parent references it.
    pub fn flush_from<D: Driver>(
        &mut self,
        root: NodeId,
        areas: &mut AreaManager,
        summary: &mut SummaryCache,
        derived: &Derived,
        driver: &mut D,
    ) -> Result<Addr, Error> {
        // Discover every dirty descendant, recording each branch's full
        // list of resident child NodeIds (by slot) while `by_addr` still
        // reflects the pre-flush Addrs.
        let mut order = alloc::vec::Vec::new();
        let mut child_ids: BTreeMap<NodeId, alloc::vec::Vec<Option<NodeId>>> = BTreeMap::new();
        let mut stack = alloc::vec![root];
        let mut seen = alloc::collections::BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let TreeNode::Branch { children, .. } = self.get(id) {
                let mut ids = alloc::vec::Vec::with_capacity(children.len());
                for child_addr in children {
                    let cid = self.by_addr.get(child_addr).copied();
                    if let Some(cid) = cid {
                        if self.is_dirty(cid) {
                            stack.push(cid);
                        }
                    }
                    ids.push(cid);
                }
                child_ids.insert(id, ids);
            }
        }
        // `order` is parent-before-child (each node is appended when
        // popped, before its children are pushed); reversing it yields a
        // valid children-before-parents order.
        order.reverse();

        for id in order {
            if !self.is_dirty(id) {
                continue;
            }
            if let Some(ids) = child_ids.get(&id).cloned() {
                let resolved: alloc::vec::Vec<Option<Addr>> =
                    ids.iter().map(|o| o.map(|cid| self.addr_of(cid))).collect();
                if let TreeNode::Branch { children, .. } = self.get_mut(id) {
                    for (slot, new_addr) in children.iter_mut().zip(resolved.iter()) {
                        if let Some(a) = new_addr {
                            *slot = *a;
                        }
                    }
                }
            }
            self.persist(id, areas, summary, derived, driver)?;
        }
        Ok(self.addr_of(root))
    }

    /// Evicts a non-dirty, least-recently-touched node to free a slot.
    /// If every resident node is dirty, the caller cannot make progress
    /// by eviction alone (spec §4.5: "a partial flush is performed");
    /// `BTree` handles that by flushing before retrying.
    fn make_room(&mut self) -> Result<(), Error> {
        if self.nodes.len() < self.capacity {
            return Ok(());
        }
        let victim = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.dirty)
            .min_by_key(|(_, n)| n.last_touch)
            .map(|(&id, _)| id);
        match victim {
            Some(id) => {
                if let Some(n) = self.nodes.remove(&id) {
                    self.by_addr.remove(&n.addr);
                }
                Ok(())
            }
            None => {
                warn!("tree cache full of dirty nodes, caller must flush before continuing");
                Err(Error::OutOfCacheMemory)
            }
        }
    }

    /// Discards a node superseded by a merge (spec §4.5 Deletion,
    /// coalesce). Its content has already been folded into a sibling;
    /// it is never persisted.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(n) = self.nodes.remove(&id) {
            self.by_addr.remove(&n.addr);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub(super) fn cut(n: usize) -> usize {
    (n + 1) / 2
}
