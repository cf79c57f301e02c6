//! Cursors: a root handle plus the path from that root to one key.

use super::{Art, CursorStack, RootId};
use crate::allocator::{NodeAllocator, NodeId};

/// Outcome of a neighbour search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindResult {
    /// Positioned on the requested key.
    Exact,
    /// Key absent; positioned on the nearest smaller key.
    Previous,
    /// Key absent; positioned on the nearest larger key.
    Next,
    /// No key in scope; cursor invalidated.
    NotFound,
}

/// One step of a cursor path.
///
/// `pos_in_node == -1` means the key ends at this node's own value;
/// otherwise it is the slot the path continues through, keyed by `byte`.
/// `key_offset` is the key length consumed up to and including this step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorItem {
    pub(crate) node: NodeId,
    pub(crate) key_offset: u32,
    pub(crate) pos: i16,
    pub(crate) byte: u8,
}

impl CursorItem {
    #[inline]
    pub(crate) fn own_value(node: NodeId, key_offset: usize) -> Self {
        Self {
            node,
            key_offset: key_offset as u32,
            pos: -1,
            byte: 0,
        }
    }

    #[inline]
    pub(crate) fn slot(node: NodeId, key_offset: usize, pos: usize, byte: u8) -> Self {
        Self {
            node,
            key_offset: key_offset as u32,
            pos: pos as i16,
            byte,
        }
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn key_offset(&self) -> usize {
        self.key_offset as usize
    }

    #[inline]
    pub fn pos_in_node(&self) -> i16 {
        self.pos
    }

    #[inline]
    pub fn byte(&self) -> u8 {
        self.byte
    }

    #[inline]
    pub(crate) fn is_own_value(&self) -> bool {
        self.pos < 0
    }

    #[inline]
    pub(crate) fn slot_pos(&self) -> usize {
        debug_assert!(self.pos >= 0, "own-value frame has no slot");
        self.pos as usize
    }
}

/// Position inside one tree version.
///
/// A cursor owns no nodes; it is only meaningful while its root is alive and
/// unchanged by other cursors. Mutating through one cursor leaves every other
/// cursor on the same root to be repositioned.
#[derive(Clone, Debug)]
pub struct Cursor {
    root: RootId,
    stack: CursorStack,
}

impl Cursor {
    pub(crate) fn new(root: RootId) -> Self {
        Self {
            root,
            stack: CursorStack::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Rebinds to another root; the stack keeps its allocation.
    pub fn set_new_root(&mut self, root: RootId) {
        self.root = root;
        self.stack.clear();
    }

    #[inline]
    pub fn invalidate(&mut self) {
        self.stack.clear();
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.stack.is_empty()
    }

    /// The path from the root to the current key.
    #[inline]
    pub fn items(&self) -> &[CursorItem] {
        &self.stack
    }

    #[inline]
    fn top(&self) -> &CursorItem {
        match self.stack.last() {
            Some(item) => item,
            None => panic!("cursor is not positioned"),
        }
    }

    // -------------------------------------------------------------------------
    // Positioning
    // -------------------------------------------------------------------------

    pub fn find_exact<A: NodeAllocator>(&mut self, art: &Art<A>, key: &[u8]) -> bool {
        art.find_exact(self.root, &mut self.stack, key)
    }

    pub fn find<A: NodeAllocator>(&mut self, art: &Art<A>, key: &[u8]) -> FindResult {
        art.find(self.root, &mut self.stack, &[], key)
    }

    /// Like [`find`](Self::find) for `key_prefix ++ key`, never leaving keys
    /// that start with `key_prefix`.
    pub fn find_with_prefix<A: NodeAllocator>(
        &mut self,
        art: &Art<A>,
        key_prefix: &[u8],
        key: &[u8],
    ) -> FindResult {
        art.find(self.root, &mut self.stack, key_prefix, key)
    }

    pub fn find_first<A: NodeAllocator>(&mut self, art: &Art<A>, key_prefix: &[u8]) -> bool {
        art.find_first(self.root, &mut self.stack, key_prefix)
    }

    pub fn find_last<A: NodeAllocator>(&mut self, art: &Art<A>, key_prefix: &[u8]) -> bool {
        art.find_last(self.root, &mut self.stack, key_prefix)
    }

    pub fn seek_index<A: NodeAllocator>(&mut self, art: &Art<A>, index: u64) -> bool {
        art.seek_index(self.root, &mut self.stack, index)
    }

    pub fn move_next<A: NodeAllocator>(&mut self, art: &Art<A>) -> bool {
        art.move_next(&mut self.stack)
    }

    pub fn move_previous<A: NodeAllocator>(&mut self, art: &Art<A>) -> bool {
        art.move_previous(&mut self.stack)
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Ordinal of the current key, `None` when unpositioned.
    pub fn calc_index<A: NodeAllocator>(&self, art: &Art<A>) -> Option<u64> {
        art.calc_index(&self.stack)
    }

    /// `index(to) - index(self)`.
    pub fn calc_distance<A: NodeAllocator>(&self, art: &Art<A>, to: &Cursor) -> i64 {
        let from = self.calc_index(art).unwrap_or_else(|| panic!("cursor is not positioned"));
        let to = to.calc_index(art).unwrap_or_else(|| panic!("target cursor is not positioned"));
        to as i64 - from as i64
    }

    #[inline]
    pub fn key_length(&self) -> usize {
        self.top().key_offset()
    }

    /// Writes the current key into `buffer` and returns the written part.
    pub fn fill_by_key<'b, A: NodeAllocator>(
        &self,
        art: &Art<A>,
        buffer: &'b mut [u8],
    ) -> &'b [u8] {
        let len = self.key_length();
        assert!(buffer.len() >= len, "key buffer too small: {} < {len}", buffer.len());
        let mut offset = 0usize;
        for item in &self.stack {
            let prefix = art.node(item.node).prefix();
            buffer[offset..offset + prefix.len()].copy_from_slice(prefix);
            offset += prefix.len();
            if !item.is_own_value() {
                buffer[offset] = item.byte;
                offset += 1;
            }
        }
        debug_assert_eq!(offset, len);
        &buffer[..len]
    }

    /// The current key as an owned buffer.
    pub fn key<A: NodeAllocator>(&self, art: &Art<A>) -> Vec<u8> {
        let mut key = vec![0u8; self.key_length()];
        self.fill_by_key(art, &mut key);
        key
    }

    /// Whether the current key starts with `prefix`.
    pub fn key_has_prefix<A: NodeAllocator>(&self, art: &Art<A>, prefix: &[u8]) -> bool {
        if !self.is_valid() || self.key_length() < prefix.len() {
            return false;
        }
        let mut offset = 0usize;
        for item in &self.stack {
            if offset >= prefix.len() {
                return true;
            }
            let node_prefix = art.node(item.node).prefix();
            let n = node_prefix.len().min(prefix.len() - offset);
            if node_prefix[..n] != prefix[offset..offset + n] {
                return false;
            }
            offset += n;
            if offset >= prefix.len() {
                return true;
            }
            if !item.is_own_value() {
                if prefix[offset] != item.byte {
                    return false;
                }
                offset += 1;
            }
        }
        offset >= prefix.len()
    }

    pub fn value_length<A: NodeAllocator>(&self, art: &Art<A>) -> usize {
        self.value(art).len()
    }

    /// The current value, borrowed from the tree.
    pub fn value<'a, A: NodeAllocator>(&self, art: &'a Art<A>) -> &'a [u8] {
        let top = *self.top();
        let node = art.node(top.node);
        if top.is_own_value() {
            node.value()
        } else {
            node.inline_bytes(top.slot_pos())
        }
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    /// Replaces the current value.
    pub fn write_value<A: NodeAllocator>(&mut self, art: &mut Art<A>, content: &[u8]) {
        assert!(self.is_valid(), "cursor is not positioned");
        art.write_value(self.root, &mut self.stack, content);
    }

    /// Inserts or updates `key`; the cursor ends on it. Returns `true` if new.
    pub fn upsert<A: NodeAllocator>(
        &mut self,
        art: &mut Art<A>,
        key: &[u8],
        content: &[u8],
    ) -> bool {
        art.upsert(self.root, &mut self.stack, key, content)
    }

    /// Erases the current key and invalidates the cursor.
    pub fn erase<A: NodeAllocator>(&mut self, art: &mut Art<A>) {
        assert!(self.is_valid(), "cursor is not positioned");
        let mut right: CursorStack = self.stack.clone();
        art.erase_range(self.root, &mut self.stack, &mut right);
    }

    /// Erases every key from this cursor to `to`, inclusive, in either order.
    ///
    /// Both cursors are invalidated. Returns the number of erased keys.
    pub fn erase_to<A: NodeAllocator>(&mut self, art: &mut Art<A>, to: &mut Cursor) -> u64 {
        assert_eq!(self.root, to.root, "cursors belong to different roots");
        assert!(self.is_valid() && to.is_valid(), "cursor is not positioned");
        if self.calc_index(art) > to.calc_index(art) {
            art.erase_range(self.root, &mut to.stack, &mut self.stack)
        } else {
            art.erase_range(self.root, &mut self.stack, &mut to.stack)
        }
    }

    /// Replaces the tree contents with `entries`, which must be in strictly
    /// ascending key order. Invalidates the cursor.
    pub fn build_tree<A, I, K, V>(&mut self, art: &mut Art<A>, entries: I)
    where
        A: NodeAllocator,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let entries: Vec<(K, V)> = entries.into_iter().collect();
        self.stack.clear();
        art.build_tree(self.root, &entries);
    }
}
