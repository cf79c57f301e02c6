//! Node memory for the tree.
//!
//! Every node is one contiguous byte buffer. The engine never holds Rust
//! references between nodes; it stores [`NodeId`]s inside node buffers and
//! resolves them through a [`NodeAllocator`]. This keeps node identity stable
//! for reference counting and lets an alternative allocator (off-heap, pooled,
//! instrumented) be plugged in without touching the tree code.

use crate::error::{Error, Result};

/// Handle of a node buffer handed out by a [`NodeAllocator`].
///
/// The engine packs it into 8-byte child slots, so it must stay small and
/// must never be zero once encoded (see `art::node::Slot`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Builds a handle from a raw slab index.
    #[inline]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Raw slab index of this handle.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Allocator collaborator the tree is parameterised over.
///
/// Buffers returned by [`allocate`](NodeAllocator::allocate) have exactly the
/// requested length; their contents are unspecified. Exhaustion inside
/// `allocate` is fatal.
pub trait NodeAllocator {
    /// Allocates a buffer of `size` bytes.
    fn allocate(&mut self, size: usize) -> NodeId;

    /// Returns a buffer to the allocator. The id must not be used afterwards.
    fn deallocate(&mut self, node: NodeId);

    /// Read access to a live buffer.
    fn bytes(&self, node: NodeId) -> &[u8];

    /// Write access to a live buffer.
    fn bytes_mut(&mut self, node: NodeId) -> &mut [u8];

    /// Simultaneous access to two distinct buffers (copy source, copy target).
    fn pair_mut(&mut self, src: NodeId, dst: NodeId) -> (&[u8], &mut [u8]);

    /// Total bytes currently held by live buffers.
    fn allocated_bytes(&self) -> usize;

    /// Number of live buffers.
    fn live_allocations(&self) -> usize;
}

// =============================================================================
// Arena allocator
// =============================================================================

/// Default allocator: a slab of exact-size boxed buffers with index reuse.
///
/// Retired slots go onto a free list and are handed out again by later
/// allocations, so ids stay dense even under heavy copy-on-write churn.
pub struct ArenaAllocator {
    slots: Vec<Option<Box<[u8]>>>,
    free: Vec<u32>,
    allocated_bytes: usize,
    live: usize,
    limit: Option<usize>,
}

impl ArenaAllocator {
    /// Creates an empty arena without a memory limit.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty arena with room for `nodes` buffers before the slab grows.
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            slots: Vec::with_capacity(nodes),
            free: Vec::new(),
            allocated_bytes: 0,
            live: 0,
            limit: None,
        }
    }

    /// Caps the total number of live bytes.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Configured memory limit, if any.
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Fallible allocation honouring the memory limit.
    pub fn try_allocate(&mut self, size: usize) -> Result<NodeId> {
        if let Some(limit) = self.limit {
            if self.allocated_bytes + size > limit {
                return Err(Error::OutOfMemory {
                    requested: size,
                    allocated: self.allocated_bytes,
                    limit,
                });
            }
        }
        let buffer = vec![0u8; size].into_boxed_slice();
        let index = match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(buffer);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| Error::OutOfMemory {
                    requested: size,
                    allocated: self.allocated_bytes,
                    limit: self.limit.unwrap_or(usize::MAX),
                })?;
                self.slots.push(Some(buffer));
                index
            }
        };
        self.allocated_bytes += size;
        self.live += 1;
        Ok(NodeId(index))
    }

    #[inline]
    fn slot(&self, node: NodeId) -> &[u8] {
        match self.slots.get(node.0 as usize) {
            Some(Some(buffer)) => buffer,
            _ => panic!("use of freed or unknown node {:?}", node),
        }
    }

    #[inline]
    fn slot_mut(&mut self, node: NodeId) -> &mut [u8] {
        match self.slots.get_mut(node.0 as usize) {
            Some(Some(buffer)) => buffer,
            _ => panic!("use of freed or unknown node {:?}", node),
        }
    }
}

impl Default for ArenaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeAllocator for ArenaAllocator {
    fn allocate(&mut self, size: usize) -> NodeId {
        match self.try_allocate(size) {
            Ok(node) => node,
            Err(err) => panic!("node allocation failed: {err}"),
        }
    }

    fn deallocate(&mut self, node: NodeId) {
        let slot = self
            .slots
            .get_mut(node.0 as usize)
            .unwrap_or_else(|| panic!("deallocating unknown node {:?}", node));
        let buffer = slot
            .take()
            .unwrap_or_else(|| panic!("double free of node {:?}", node));
        self.allocated_bytes -= buffer.len();
        self.live -= 1;
        self.free.push(node.0);
    }

    #[inline]
    fn bytes(&self, node: NodeId) -> &[u8] {
        self.slot(node)
    }

    #[inline]
    fn bytes_mut(&mut self, node: NodeId) -> &mut [u8] {
        self.slot_mut(node)
    }

    fn pair_mut(&mut self, src: NodeId, dst: NodeId) -> (&[u8], &mut [u8]) {
        assert_ne!(src, dst, "pair_mut needs two distinct nodes");
        let (s, d) = (src.0 as usize, dst.0 as usize);
        let (src_slot, dst_slot) = if s < d {
            let (lo, hi) = self.slots.split_at_mut(d);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(s);
            (&hi[0], &mut lo[d])
        };
        match (src_slot, dst_slot) {
            (Some(src), Some(dst)) => (&src[..], &mut dst[..]),
            _ => panic!("use of freed node in copy {:?} -> {:?}", src, dst),
        }
    }

    #[inline]
    fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    #[inline]
    fn live_allocations(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_reuse() {
        let mut arena = ArenaAllocator::new();
        let a = arena.allocate(16);
        let b = arena.allocate(32);
        assert_ne!(a, b);
        assert_eq!(arena.allocated_bytes(), 48);
        assert_eq!(arena.live_allocations(), 2);

        arena.deallocate(a);
        assert_eq!(arena.allocated_bytes(), 32);
        let c = arena.allocate(8);
        assert_eq!(c, a, "freed index should be reused");
        assert_eq!(arena.bytes(c).len(), 8);
    }

    #[test]
    fn test_pair_mut_both_orders() {
        let mut arena = ArenaAllocator::new();
        let a = arena.allocate(4);
        let b = arena.allocate(4);
        arena.bytes_mut(a).copy_from_slice(&[1, 2, 3, 4]);
        {
            let (src, dst) = arena.pair_mut(a, b);
            dst.copy_from_slice(src);
        }
        assert_eq!(arena.bytes(b), &[1, 2, 3, 4]);
        arena.bytes_mut(b)[0] = 9;
        {
            let (src, dst) = arena.pair_mut(b, a);
            dst.copy_from_slice(src);
        }
        assert_eq!(arena.bytes(a), &[9, 2, 3, 4]);
    }

    #[test]
    fn test_memory_limit() {
        let mut arena = ArenaAllocator::new().with_limit(100);
        assert!(arena.try_allocate(60).is_ok());
        let err = arena.try_allocate(60).unwrap_err();
        assert_eq!(
            err,
            Error::OutOfMemory {
                requested: 60,
                allocated: 60,
                limit: 100
            }
        );
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut arena = ArenaAllocator::new();
        let a = arena.allocate(4);
        arena.deallocate(a);
        arena.deallocate(a);
    }
}
