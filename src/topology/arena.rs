//! Generational node arena backing the navigation trees.
//!
//! Nodes are owned by their tree and addressed through [`NodeHandle`]s.
//! A handle embeds the arena id and the slot generation, so a handle kept
//! by an external consumer (a proxy, a view model) turns into `None` once
//! its node was removed, instead of silently resolving to a reused slot.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Non-owning reference to a tree node, validated on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    arena_id: u64,
    index: u32,
    generation: u32,
}

impl NodeHandle {
    /// Slot index, only meaningful within the owning arena.
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

struct Slot<T> {
    generation: u32,
    node: Option<T>,
}

/// Slab of nodes with generation-checked handles.
pub struct Arena<T> {
    id: u64,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store `node`, returning its handle.
    pub fn insert(&mut self, node: T) -> NodeHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeHandle { arena_id: self.id, index, generation: slot.generation }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, node: Some(node) });
                NodeHandle { arena_id: self.id, index, generation: 0 }
            }
        }
    }

    /// Remove the node behind `handle`, invalidating all copies of it.
    pub fn remove(&mut self, handle: NodeHandle) -> Option<T> {
        if !self.owns(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index()];
        let node = slot.node.take();
        if node.is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(handle.index);
        }
        node
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots[handle.index()].node.as_ref()
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots[handle.index()].node.as_mut()
    }

    /// Drop every node and invalidate every outstanding handle.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
    }

    fn owns(&self, handle: NodeHandle) -> bool {
        handle.arena_id == self.id
            && handle.index() < self.slots.len()
            && self.slots[handle.index()].generation == handle.generation
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}
