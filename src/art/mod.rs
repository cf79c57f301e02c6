//! Copy-on-write Adaptive Radix Tree.
//!
//! Nodes are reference counted byte buffers (see [`node`]). Several roots may
//! share subtrees; every mutation goes through a cursor stack and clones any
//! shared node on the path before touching it, so other roots never observe
//! the change. The engine itself takes no locks: readers share `&Art`, a
//! writer needs `&mut Art`.

mod cursor;
mod diagnostics;
mod erase;
pub mod node;
mod rank;
mod search;
mod upsert;

use smallvec::{smallvec, SmallVec};
use tracing::{debug, trace};

use crate::allocator::{ArenaAllocator, NodeAllocator, NodeId};
use crate::error::{Error, Result};
use crate::Config;

pub use cursor::{Cursor, CursorItem, FindResult};
pub use diagnostics::{ArtMemoryStats, NodeInfo};
use node::{NodeType, NodeView, NodeViewMut, Slot};

pub(crate) type CursorStack = SmallVec<[CursorItem; 16]>;

/// Handle of a root registered in an [`Art`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootId(u32);

/// A tree version: root node plus transaction metadata.
#[derive(Debug)]
pub struct RootNode {
    node: Option<NodeId>,
    transaction_id: u64,
    commit_ulong: u64,
    ulongs: Vec<u64>,
}

impl RootNode {
    #[inline]
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    #[inline]
    pub fn set_transaction_id(&mut self, id: u64) {
        self.transaction_id = id;
    }

    #[inline]
    pub fn commit_ulong(&self) -> u64 {
        self.commit_ulong
    }

    #[inline]
    pub fn set_commit_ulong(&mut self, value: u64) {
        self.commit_ulong = value;
    }

    /// User counter `index`; indices past the configured count read as 0.
    #[inline]
    pub fn ulong(&self, index: usize) -> u64 {
        self.ulongs.get(index).copied().unwrap_or(0)
    }

    pub fn set_ulong(&mut self, index: usize, value: u64) -> Result<()> {
        let count = self.ulongs.len();
        let slot = self
            .ulongs
            .get_mut(index)
            .ok_or(Error::UlongIndexOutOfRange { index, count })?;
        *slot = value;
        Ok(())
    }

    #[inline]
    pub fn ulong_count(&self) -> usize {
        self.ulongs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }
}

/// The tree engine: node allocator plus the set of live roots.
pub struct Art<A: NodeAllocator = ArenaAllocator> {
    alloc: A,
    roots: Vec<Option<RootNode>>,
    free_roots: Vec<u32>,
    config: Config,
}

impl Art<ArenaAllocator> {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an engine backed by an [`ArenaAllocator`] sized from `config`.
    pub fn with_config(config: Config) -> Self {
        let mut alloc = ArenaAllocator::with_capacity(config.initial_node_capacity);
        if let Some(limit) = config.memory_limit {
            alloc = alloc.with_limit(limit);
        }
        Self::with_allocator(alloc, config)
    }
}

impl Default for Art<ArenaAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: NodeAllocator> Art<A> {
    /// Creates an engine on top of a caller supplied allocator.
    pub fn with_allocator(alloc: A, config: Config) -> Self {
        Self {
            alloc,
            roots: Vec::new(),
            free_roots: Vec::new(),
            config,
        }
    }

    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Roots
    // =========================================================================

    fn insert_root(&mut self, root: RootNode) -> RootId {
        match self.free_roots.pop() {
            Some(index) => {
                self.roots[index as usize] = Some(root);
                RootId(index)
            }
            None => {
                self.roots.push(Some(root));
                RootId((self.roots.len() - 1) as u32)
            }
        }
    }

    /// Registers a new empty tree version.
    pub fn create_empty_root(&mut self) -> RootId {
        let root = RootNode {
            node: None,
            transaction_id: 0,
            commit_ulong: 0,
            ulongs: vec![0; self.config.ulong_count],
        };
        let id = self.insert_root(root);
        debug!(root = id.0, "created empty root");
        id
    }

    /// New root sharing the whole tree of `id`, with copied metadata.
    pub fn clone_root(&mut self, id: RootId) -> RootId {
        let src = self.root(id);
        let copy = RootNode {
            node: src.node,
            transaction_id: src.transaction_id,
            commit_ulong: src.commit_ulong,
            ulongs: src.ulongs.clone(),
        };
        if let Some(node) = copy.node {
            self.reference(node);
        }
        let new_id = self.insert_root(copy);
        debug!(from = id.0, root = new_id.0, "cloned root");
        new_id
    }

    /// Retires a root, releasing its reference on the tree.
    pub fn dereference_root(&mut self, id: RootId) {
        let root = self
            .roots
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("dereferencing dead root {:?}", id));
        self.free_roots.push(id.0);
        self.dereference(root.node);
        debug!(root = id.0, "retired root");
    }

    pub fn root(&self, id: RootId) -> &RootNode {
        match self.roots.get(id.0 as usize) {
            Some(Some(root)) => root,
            _ => panic!("use of dead root {:?}", id),
        }
    }

    pub fn root_mut(&mut self, id: RootId) -> &mut RootNode {
        match self.roots.get_mut(id.0 as usize) {
            Some(Some(root)) => root,
            _ => panic!("use of dead root {:?}", id),
        }
    }

    /// Number of keys stored under `id`.
    pub fn key_count(&self, id: RootId) -> u64 {
        self.root_node(id)
            .map_or(0, |node| self.node(node).recursive_child_count())
    }

    /// Creates an unpositioned cursor over `id`.
    pub fn create_cursor(&self, id: RootId) -> Cursor {
        debug_assert!(self.roots.get(id.0 as usize).is_some_and(Option::is_some));
        Cursor::new(id)
    }

    /// Number of registered roots.
    pub fn live_roots(&self) -> usize {
        self.roots.iter().filter(|r| r.is_some()).count()
    }

    #[inline]
    pub(crate) fn root_node(&self, id: RootId) -> Option<NodeId> {
        self.root(id).node
    }

    /// Replaces the root pointer without touching reference counts.
    #[inline]
    pub(crate) fn set_root_node(&mut self, id: RootId, node: Option<NodeId>) {
        self.root_mut(id).node = node;
    }

    // =========================================================================
    // Node access
    // =========================================================================

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> NodeView<'_> {
        NodeView::new(self.alloc.bytes(id))
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> NodeViewMut<'_> {
        NodeViewMut::new(self.alloc.bytes_mut(id))
    }

    /// Keys below a slot: 1 for an inline value, the child's recursive count otherwise.
    #[inline]
    pub(crate) fn slot_weight(&self, slot: Slot) -> u64 {
        match slot {
            Slot::Empty => 0,
            Slot::Inline(_) => 1,
            Slot::Child(child) => self.node(child).recursive_child_count(),
        }
    }

    // =========================================================================
    // Reference counting and copy-on-write
    // =========================================================================

    pub(crate) fn allocate_node(
        &mut self,
        node_type: NodeType,
        prefix_len: usize,
        value_len: usize,
    ) -> NodeId {
        let size = node::node_size(node_type, prefix_len, value_len);
        let id = self.alloc.allocate(size);
        self.node_mut(id).init(node_type, prefix_len, value_len);
        id
    }

    #[inline]
    pub(crate) fn reference(&mut self, id: NodeId) {
        let count = self.node(id).ref_count();
        self.node_mut(id).set_ref_count(count + 1);
    }

    pub(crate) fn reference_all_children(&mut self, id: NodeId) {
        let children: SmallVec<[NodeId; 16]> = self
            .node(id)
            .children()
            .filter_map(|c| c.slot.child())
            .collect();
        for child in children {
            self.reference(child);
        }
    }

    /// Drops one reference; frees the node and releases its children at zero.
    pub(crate) fn dereference(&mut self, node: Option<NodeId>) {
        let Some(node) = node else {
            return;
        };
        let mut work: SmallVec<[NodeId; 16]> = smallvec![node];
        while let Some(id) = work.pop() {
            let count = self.node(id).ref_count();
            debug_assert!(count > 0, "dereferencing dead node {:?}", id);
            if count > 1 {
                self.node_mut(id).set_ref_count(count - 1);
                continue;
            }
            work.extend(self.node(id).children().filter_map(|c| c.slot.child()));
            self.alloc.deallocate(id);
        }
    }

    /// Private copy of `id`; children gain one reference each.
    pub(crate) fn clone_node(&mut self, id: NodeId) -> NodeId {
        let size = self.node(id).byte_size();
        let new = self.alloc.allocate(size);
        {
            let (src, dst) = self.alloc.pair_mut(id, new);
            dst.copy_from_slice(src);
        }
        self.node_mut(new).set_ref_count(1);
        self.reference_all_children(new);
        trace!(from = ?id, to = ?new, "cloned shared node");
        new
    }

    /// Copy of `id` with its key prefix shortened by `skip` leading bytes.
    ///
    /// A negative `skip` lengthens the prefix instead: the old prefix ends up
    /// at the back and the first `-skip` bytes are left for the caller.
    pub(crate) fn clone_node_with_key_prefix_cut(&mut self, id: NodeId, skip: isize) -> NodeId {
        let (node_type, prefix_len, value_len) = {
            let v = self.node(id);
            (v.node_type(), v.prefix_len(), v.value_len())
        };
        let new_prefix_len = (prefix_len as isize - skip) as usize;
        let new = self.allocate_node(node_type, new_prefix_len, value_len);
        {
            let (src, dst) = self.alloc.pair_mut(id, new);
            let src = NodeView::new(src);
            let mut dst = NodeViewMut::new(dst);
            dst.copy_body_from(src);
            if skip >= 0 {
                dst.prefix_mut().copy_from_slice(&src.prefix()[skip as usize..]);
            } else {
                dst.prefix_mut()[(-skip) as usize..].copy_from_slice(src.prefix());
            }
            dst.value_mut().copy_from_slice(src.value());
        }
        self.reference_all_children(new);
        new
    }

    /// Copy of `id` flagged IS_LEAF with room for a `value_len` byte value.
    ///
    /// The value bytes are left for the caller to fill.
    pub(crate) fn clone_node_with_value_resize(&mut self, id: NodeId, value_len: usize) -> NodeId {
        let (node_type, prefix_len) = {
            let v = self.node(id);
            (NodeType::new(v.kind(), true), v.prefix_len())
        };
        let new = self.allocate_node(node_type, prefix_len, value_len);
        {
            let (src, dst) = self.alloc.pair_mut(id, new);
            let src = NodeView::new(src);
            let mut dst = NodeViewMut::new(dst);
            dst.copy_body_from(src);
            dst.prefix_mut().copy_from_slice(src.prefix());
        }
        self.reference_all_children(new);
        new
    }

    /// Copy of a full node in the next larger class.
    pub(crate) fn expand_node(&mut self, id: NodeId) -> NodeId {
        let (node_type, prefix_len, value_len) = {
            let v = self.node(id);
            (v.node_type(), v.prefix_len(), v.value_len())
        };
        let kind = node_type.kind().grown();
        let new = self.allocate_node(node_type.with_kind(kind), prefix_len, value_len);
        {
            let (src, dst) = self.alloc.pair_mut(id, new);
            let src = NodeView::new(src);
            let mut dst = NodeViewMut::new(dst);
            dst.prefix_mut().copy_from_slice(src.prefix());
            dst.value_mut().copy_from_slice(src.value());
            for child in src.children() {
                dst.append_child(child.byte, child.slot);
            }
            dst.set_recursive_child_count(src.recursive_child_count());
        }
        self.reference_all_children(new);
        trace!(from = ?node_type.kind(), to = ?kind, node = ?new, "expanded node");
        new
    }

    /// Clones every shared node on `stack`, relinking parents (or the root).
    pub(crate) fn make_unique(&mut self, root: RootId, stack: &mut [CursorItem]) {
        for i in 0..stack.len() {
            let node = stack[i].node;
            if self.node(node).ref_count() > 1 {
                let new = self.clone_node(node);
                self.overwrite_node_in_stack(root, stack, i, new);
            }
        }
    }

    /// Like [`make_unique`](Self::make_unique) but always replaces the last
    /// node with a copy carrying a `value_len` byte value.
    pub(crate) fn make_unique_last_resize(
        &mut self,
        root: RootId,
        stack: &mut [CursorItem],
        value_len: usize,
    ) {
        let last = stack.len() - 1;
        self.make_unique(root, &mut stack[..last]);
        let new = self.clone_node_with_value_resize(stack[last].node, value_len);
        self.overwrite_node_in_stack(root, stack, last, new);
    }

    /// Points frame `i` (and its parent slot or the root) at `new`.
    pub(crate) fn overwrite_node_in_stack(
        &mut self,
        root: RootId,
        stack: &mut [CursorItem],
        i: usize,
        new: NodeId,
    ) {
        stack[i].node = new;
        if i == 0 {
            let old = self.root_node(root);
            if old != Some(new) {
                self.set_root_node(root, Some(new));
                self.dereference(old);
            }
        } else {
            let parent = stack[i - 1];
            self.write_child_in_node(&parent, new);
        }
    }

    /// Stores `child` in the slot addressed by `item`, releasing what was there.
    pub(crate) fn write_child_in_node(&mut self, item: &CursorItem, child: NodeId) {
        let pos = item.slot_pos();
        let old = self.node(item.node).slot(pos);
        if old == Slot::Child(child) {
            return;
        }
        self.node_mut(item.node).set_slot(pos, Slot::Child(child));
        self.dereference(old.child());
    }

    /// Stores an inline value in the slot addressed by `item`.
    pub(crate) fn write_inline_in_node(&mut self, item: &CursorItem, value: &[u8]) {
        let pos = item.slot_pos();
        let old = self.node(item.node).slot(pos);
        self.node_mut(item.node)
            .set_slot(pos, Slot::Inline(node::InlineValue::new(value)));
        self.dereference(old.child());
    }

    pub(crate) fn adjust_recursive_child_count(&mut self, stack: &[CursorItem], delta: i64) {
        for item in stack {
            let count = self.node(item.node).recursive_child_count();
            let adjusted = count as i64 + delta;
            debug_assert!(adjusted >= 0, "recursive child count underflow");
            self.node_mut(item.node)
                .set_recursive_child_count(adjusted as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::node::{InlineValue, NodeKind};
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_is_send_sync() {
        assert_send_sync::<Art>();
    }

    #[test]
    fn test_root_lifecycle() {
        let mut art = Art::new();
        let a = art.create_empty_root();
        assert!(art.root(a).is_empty());
        assert_eq!(art.key_count(a), 0);

        let mut c = art.create_cursor(a);
        assert!(c.upsert(&mut art, b"key", b"value"));
        let b = art.clone_root(a);
        assert_eq!(art.key_count(b), 1);
        assert_eq!(art.live_roots(), 2);

        art.dereference_root(a);
        assert_eq!(art.key_count(b), 1);
        art.dereference_root(b);
        assert_eq!(art.live_roots(), 0);
        assert_eq!(art.allocator().live_allocations(), 0);
    }

    #[test]
    fn test_root_ulongs() {
        let mut art = Art::with_config(Config {
            ulong_count: 2,
            ..Config::default()
        });
        let root = art.create_empty_root();
        art.root_mut(root).set_ulong(1, 42).unwrap();
        art.root_mut(root).set_commit_ulong(7);
        art.root_mut(root).set_transaction_id(3);
        assert_eq!(art.root(root).ulong(1), 42);
        assert_eq!(art.root(root).ulong(5), 0);
        assert_eq!(
            art.root_mut(root).set_ulong(2, 1),
            Err(Error::UlongIndexOutOfRange { index: 2, count: 2 })
        );

        let copy = art.clone_root(root);
        assert_eq!(art.root(copy).ulong(1), 42);
        assert_eq!(art.root(copy).commit_ulong(), 7);
        assert_eq!(art.root(copy).transaction_id(), 3);
    }

    #[test]
    fn test_clone_node_references_children() {
        let mut art = Art::new();
        let child = art.allocate_node(NodeType::new(NodeKind::Leaf, true), 0, 0);
        let parent = art.allocate_node(NodeType::new(NodeKind::Node4, false), 0, 0);
        art.node_mut(parent).append_child(b'a', Slot::Child(child));
        art.node_mut(parent)
            .append_child(b'b', Slot::Inline(InlineValue::new(b"x")));

        let copy = art.clone_node(parent);
        assert_eq!(art.node(child).ref_count(), 2);
        assert_eq!(art.node(copy).ref_count(), 1);

        art.dereference(Some(parent));
        assert_eq!(art.node(child).ref_count(), 1);
        art.dereference(Some(copy));
        assert_eq!(art.allocator().live_allocations(), 0);
    }

    #[test]
    fn test_expand_node_keeps_children() {
        let mut art = Art::new();
        let node = art.allocate_node(NodeType::new(NodeKind::Node16, true), 2, 1);
        {
            let mut n = art.node_mut(node);
            n.prefix_mut().copy_from_slice(b"pp");
            n.value_mut().copy_from_slice(b"v");
            for b in 0..16u8 {
                n.append_child(b * 3, Slot::Inline(InlineValue::new(&[b])));
            }
            n.set_recursive_child_count(17);
        }
        let grown = art.expand_node(node);
        let v = art.node(grown);
        assert_eq!(v.kind(), NodeKind::Node48);
        assert!(v.is_leaf());
        assert_eq!(v.prefix(), b"pp");
        assert_eq!(v.value(), b"v");
        assert_eq!(v.child_count(), 16);
        assert_eq!(v.recursive_child_count(), 17);
        assert_eq!(v.find(9), Ok(3));
        assert_eq!(v.slot(3), Slot::Inline(InlineValue::new(&[3])));
    }

    #[test]
    fn test_prefix_cut_both_directions() {
        let mut art = Art::new();
        let node = art.allocate_node(NodeType::new(NodeKind::Leaf, true), 4, 2);
        art.node_mut(node).prefix_mut().copy_from_slice(b"abcd");
        art.node_mut(node).value_mut().copy_from_slice(b"vv");

        let cut = art.clone_node_with_key_prefix_cut(node, 2);
        assert_eq!(art.node(cut).prefix(), b"cd");
        assert_eq!(art.node(cut).value(), b"vv");

        let longer = art.clone_node_with_key_prefix_cut(node, -3);
        assert_eq!(&art.node(longer).prefix()[3..], b"abcd");
        assert_eq!(art.node(longer).prefix().len(), 7);
    }
}
