//! Byte layout of tree nodes.
//!
//! A node is a single buffer from the allocator. All offset arithmetic lives
//! here; the rest of the engine only talks to [`NodeView`] / [`NodeViewMut`].
//!
//! ```text
//! header (20 bytes)
//!   [0]      node type: kind in bits 0..3, IS_LEAF in bit 3
//!   [1]      reserved
//!   [2..4]   child count (u16)
//!   [4..6]   key prefix length (u16, 0xFFFF = extended u32 after the body)
//!   [6..8]   reserved
//!   [8..12]  reference count (u32)
//!   [12..20] recursive child count (u64)
//! body
//!   Leaf     -
//!   Node4    keys[4]    slots[4]
//!   Node16   keys[16]   slots[16]
//!   Node48   index[256] slots[48]     (index 255 = no child)
//!   Node256  slots[256]               (indexed by byte)
//! tail
//!   [extended prefix length u32] [value length u32 if IS_LEAF] prefix [value]
//! ```

use std::fmt;

use crate::allocator::NodeId;

pub(crate) const HEADER_SIZE: usize = 20;
const OFF_TYPE: usize = 0;
const OFF_CHILD_COUNT: usize = 2;
const OFF_PREFIX_LEN: usize = 4;
const OFF_REF_COUNT: usize = 8;
const OFF_RECURSIVE: usize = 12;

pub(crate) const SLOT_SIZE: usize = 8;

/// Longest value stored directly in a child slot instead of a leaf node.
pub const MAX_INLINE_VALUE: usize = 7;

const EXTENDED_PREFIX: u16 = 0xFFFF;
pub(crate) const EMPTY_INDEX: u8 = 255;

// =============================================================================
// Little-endian field helpers
// =============================================================================

#[inline]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

#[inline]
fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

// =============================================================================
// Node kinds and types
// =============================================================================

/// Size class of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    /// No children; only a prefix and a value.
    Leaf,
    /// Up to 4 children, sorted key bytes.
    Node4,
    /// Up to 16 children, sorted key bytes.
    Node16,
    /// Up to 48 children behind a 256-entry byte index.
    Node48,
    /// Up to 256 children indexed directly by byte.
    Node256,
}

impl NodeKind {
    #[inline]
    fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => NodeKind::Leaf,
            1 => NodeKind::Node4,
            2 => NodeKind::Node16,
            3 => NodeKind::Node48,
            4 => NodeKind::Node256,
            other => panic!("corrupt node type bits {other}"),
        }
    }

    #[inline]
    fn bits(self) -> u8 {
        match self {
            NodeKind::Leaf => 0,
            NodeKind::Node4 => 1,
            NodeKind::Node16 => 2,
            NodeKind::Node48 => 3,
            NodeKind::Node256 => 4,
        }
    }

    /// Capacity of this class.
    #[inline]
    pub fn max_children(self) -> usize {
        match self {
            NodeKind::Leaf => 0,
            NodeKind::Node4 => 4,
            NodeKind::Node16 => 16,
            NodeKind::Node48 => 48,
            NodeKind::Node256 => 256,
        }
    }

    #[inline]
    fn slots_offset(self) -> usize {
        match self {
            NodeKind::Leaf | NodeKind::Node256 => HEADER_SIZE,
            NodeKind::Node4 => HEADER_SIZE + 4,
            NodeKind::Node16 => HEADER_SIZE + 16,
            NodeKind::Node48 => HEADER_SIZE + 256,
        }
    }

    /// Header plus body size, before the variable tail.
    #[inline]
    pub fn base_size(self) -> usize {
        self.slots_offset() + self.max_children() * SLOT_SIZE
    }

    /// Next larger class. Growing past Node256 is a bug.
    pub fn grown(self) -> Self {
        match self {
            NodeKind::Node4 => NodeKind::Node16,
            NodeKind::Node16 => NodeKind::Node48,
            NodeKind::Node48 => NodeKind::Node256,
            NodeKind::Leaf | NodeKind::Node256 => panic!("{self:?} cannot grow"),
        }
    }

    /// Smallest class able to hold `count` children.
    pub fn for_child_count(count: usize) -> Self {
        match count {
            0 => NodeKind::Leaf,
            1..=4 => NodeKind::Node4,
            5..=16 => NodeKind::Node16,
            17..=48 => NodeKind::Node48,
            _ => NodeKind::Node256,
        }
    }
}

/// Node kind plus the IS_LEAF flag (the node carries its own value).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeType(u8);

impl NodeType {
    const IS_LEAF: u8 = 8;

    /// Combines a kind with the IS_LEAF flag.
    #[inline]
    pub fn new(kind: NodeKind, is_leaf: bool) -> Self {
        NodeType(kind.bits() | if is_leaf { Self::IS_LEAF } else { 0 })
    }

    /// Size class.
    #[inline]
    pub fn kind(self) -> NodeKind {
        NodeKind::from_bits(self.0)
    }

    /// Whether the node stores a value for the key ending at its prefix.
    #[inline]
    pub fn is_leaf(self) -> bool {
        self.0 & Self::IS_LEAF != 0
    }

    /// Same flag, different class.
    #[inline]
    pub fn with_kind(self, kind: NodeKind) -> Self {
        Self::new(kind, self.is_leaf())
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            write!(f, "{:?}|IsLeaf", self.kind())
        } else {
            write!(f, "{:?}", self.kind())
        }
    }
}

/// Exact buffer size for a node with the given shape.
pub fn node_size(node_type: NodeType, prefix_len: usize, value_len: usize) -> usize {
    let mut size = node_type.kind().base_size() + prefix_len;
    if prefix_len >= EXTENDED_PREFIX as usize {
        size += 4;
    }
    if node_type.is_leaf() {
        size += 4 + value_len;
    }
    size
}

// =============================================================================
// Slots
// =============================================================================

/// A value of at most [`MAX_INLINE_VALUE`] bytes kept inside a slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InlineValue {
    len: u8,
    bytes: [u8; MAX_INLINE_VALUE],
}

impl InlineValue {
    /// Panics when `value` does not fit.
    pub fn new(value: &[u8]) -> Self {
        assert!(is_inlineable(value), "inline value too long: {}", value.len());
        let mut bytes = [0u8; MAX_INLINE_VALUE];
        bytes[..value.len()].copy_from_slice(value);
        Self {
            len: value.len() as u8,
            bytes,
        }
    }

    /// The stored bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True for a zero-length value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for InlineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Inline({:?})", self.as_slice())
    }
}

/// Whether `value` is short enough to live in a slot.
#[inline]
pub fn is_inlineable(value: &[u8]) -> bool {
    value.len() <= MAX_INLINE_VALUE
}

/// Decoded contents of an 8-byte child slot.
///
/// Encoding: all zero is empty; a set low bit marks an inline value whose
/// length is `byte0 >> 1`; anything else is `(node index + 1) << 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// No child.
    Empty,
    /// Reference to a child node (owns one reference count).
    Child(NodeId),
    /// Short value for the key ending at this slot's byte.
    Inline(InlineValue),
}

impl Slot {
    fn decode(raw: &[u8]) -> Slot {
        if raw[0] & 1 == 1 {
            let len = (raw[0] >> 1) as usize;
            debug_assert!(len <= MAX_INLINE_VALUE, "corrupt inline slot");
            Slot::Inline(InlineValue::new(&raw[1..1 + len]))
        } else {
            match read_u64(raw, 0) {
                0 => Slot::Empty,
                v => Slot::Child(NodeId::from_index(((v >> 1) - 1) as u32)),
            }
        }
    }

    fn encode(self, out: &mut [u8]) {
        match self {
            Slot::Empty => out.fill(0),
            Slot::Child(id) => write_u64(out, 0, (id.index() as u64 + 1) << 1),
            Slot::Inline(v) => {
                out.fill(0);
                out[0] = ((v.len as u8) << 1) | 1;
                out[1..1 + v.len()].copy_from_slice(v.as_slice());
            }
        }
    }

    /// The child node, if this slot points to one.
    #[inline]
    pub fn child(self) -> Option<NodeId> {
        match self {
            Slot::Child(id) => Some(id),
            _ => None,
        }
    }
}

/// A child position inside a node: slot index, key byte and decoded slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildEntry {
    pub pos: usize,
    pub byte: u8,
    pub slot: Slot,
}

// =============================================================================
// Read view
// =============================================================================

/// Read-only typed view over a node buffer.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    buf: &'a [u8],
}

impl<'a> NodeView<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        Self { buf }
    }

    #[inline]
    pub fn node_type(&self) -> NodeType {
        NodeType(self.buf[OFF_TYPE])
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.node_type().kind()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.node_type().is_leaf()
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        read_u16(self.buf, OFF_CHILD_COUNT) as usize
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        let kind = self.kind();
        kind != NodeKind::Node256 && self.child_count() >= kind.max_children()
    }

    #[inline]
    pub fn ref_count(&self) -> u32 {
        read_u32(self.buf, OFF_REF_COUNT)
    }

    #[inline]
    pub fn recursive_child_count(&self) -> u64 {
        read_u64(self.buf, OFF_RECURSIVE)
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn extended_prefix(&self) -> bool {
        read_u16(self.buf, OFF_PREFIX_LEN) == EXTENDED_PREFIX
    }

    #[inline]
    fn value_len_offset(&self) -> usize {
        let base = self.kind().base_size();
        if self.extended_prefix() {
            base + 4
        } else {
            base
        }
    }

    #[inline]
    fn prefix_offset(&self) -> usize {
        let off = self.value_len_offset();
        if self.is_leaf() {
            off + 4
        } else {
            off
        }
    }

    pub fn prefix_len(&self) -> usize {
        let short = read_u16(self.buf, OFF_PREFIX_LEN);
        if short == EXTENDED_PREFIX {
            read_u32(self.buf, self.kind().base_size()) as usize
        } else {
            short as usize
        }
    }

    pub fn prefix(&self) -> &'a [u8] {
        let off = self.prefix_offset();
        &self.buf[off..off + self.prefix_len()]
    }

    pub fn value_len(&self) -> usize {
        if self.is_leaf() {
            read_u32(self.buf, self.value_len_offset()) as usize
        } else {
            0
        }
    }

    /// The node's own value; empty for nodes without IS_LEAF.
    pub fn value(&self) -> &'a [u8] {
        let off = self.prefix_offset() + self.prefix_len();
        &self.buf[off..off + self.value_len()]
    }

    /// Sorted key bytes of a Node4/Node16.
    #[inline]
    pub fn keys(&self) -> &'a [u8] {
        debug_assert!(matches!(self.kind(), NodeKind::Node4 | NodeKind::Node16));
        &self.buf[HEADER_SIZE..HEADER_SIZE + self.child_count()]
    }

    #[inline]
    pub fn index48(&self, byte: u8) -> u8 {
        debug_assert_eq!(self.kind(), NodeKind::Node48);
        self.buf[HEADER_SIZE + byte as usize]
    }

    #[inline]
    fn slot_offset(&self, pos: usize) -> usize {
        debug_assert!(pos < self.kind().max_children());
        self.kind().slots_offset() + pos * SLOT_SIZE
    }

    #[inline]
    pub fn slot(&self, pos: usize) -> Slot {
        let off = self.slot_offset(pos);
        Slot::decode(&self.buf[off..off + SLOT_SIZE])
    }

    /// Borrowed bytes of an inline value at `pos`.
    pub fn inline_bytes(&self, pos: usize) -> &'a [u8] {
        let off = self.slot_offset(pos);
        let tag = self.buf[off];
        assert!(tag & 1 == 1, "slot {pos} does not hold an inline value");
        &self.buf[off + 1..off + 1 + (tag >> 1) as usize]
    }

    #[inline]
    fn entry(&self, pos: usize, byte: u8) -> ChildEntry {
        ChildEntry {
            pos,
            byte,
            slot: self.slot(pos),
        }
    }

    /// Looks up `byte`: `Ok(pos)` when present, otherwise `Err(insert_pos)`.
    pub fn find(&self, byte: u8) -> Result<usize, usize> {
        match self.kind() {
            NodeKind::Leaf => Err(0),
            NodeKind::Node4 | NodeKind::Node16 => self.keys().binary_search(&byte),
            NodeKind::Node48 => match self.index48(byte) {
                EMPTY_INDEX => Err(self.child_count()),
                idx => Ok(idx as usize),
            },
            NodeKind::Node256 => match self.slot(byte as usize) {
                Slot::Empty => Err(byte as usize),
                _ => Ok(byte as usize),
            },
        }
    }

    fn next_by_byte(&self, from: usize) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Node48 => (from..256).find_map(|b| match self.index48(b as u8) {
                EMPTY_INDEX => None,
                idx => Some(self.entry(idx as usize, b as u8)),
            }),
            NodeKind::Node256 => (from..256)
                .map(|b| self.entry(b, b as u8))
                .find(|e| e.slot != Slot::Empty),
            _ => unreachable!("byte scan on {:?}", self.kind()),
        }
    }

    fn previous_by_byte(&self, below: usize) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Node48 => (0..below).rev().find_map(|b| match self.index48(b as u8) {
                EMPTY_INDEX => None,
                idx => Some(self.entry(idx as usize, b as u8)),
            }),
            NodeKind::Node256 => (0..below)
                .rev()
                .map(|b| self.entry(b, b as u8))
                .find(|e| e.slot != Slot::Empty),
            _ => unreachable!("byte scan on {:?}", self.kind()),
        }
    }

    /// Child following position `pos` (`-1` = before the first child).
    pub fn child_after(&self, pos: isize, byte: u8) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Leaf => None,
            NodeKind::Node4 | NodeKind::Node16 => {
                let next = (pos + 1) as usize;
                (next < self.child_count()).then(|| self.entry(next, self.keys()[next]))
            }
            NodeKind::Node48 | NodeKind::Node256 => {
                let from = if pos < 0 { 0 } else { byte as usize + 1 };
                self.next_by_byte(from)
            }
        }
    }

    /// Child preceding position `pos`.
    pub fn child_before(&self, pos: usize, byte: u8) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Leaf => None,
            NodeKind::Node4 | NodeKind::Node16 => {
                (pos > 0).then(|| self.entry(pos - 1, self.keys()[pos - 1]))
            }
            NodeKind::Node48 | NodeKind::Node256 => self.previous_by_byte(byte as usize),
        }
    }

    #[inline]
    pub fn first_child(&self) -> Option<ChildEntry> {
        self.child_after(-1, 0)
    }

    pub fn last_child(&self) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Leaf => None,
            NodeKind::Node4 | NodeKind::Node16 => {
                let count = self.child_count();
                (count > 0).then(|| self.entry(count - 1, self.keys()[count - 1]))
            }
            NodeKind::Node48 | NodeKind::Node256 => self.previous_by_byte(256),
        }
    }

    /// Nearest existing child to a missing `byte`, preferring the larger one.
    pub fn near_child(&self, byte: u8, insert_pos: usize) -> Option<ChildEntry> {
        match self.kind() {
            NodeKind::Leaf => None,
            NodeKind::Node4 | NodeKind::Node16 => {
                let count = self.child_count();
                if count == 0 {
                    return None;
                }
                let pos = insert_pos.min(count - 1);
                Some(self.entry(pos, self.keys()[pos]))
            }
            NodeKind::Node48 | NodeKind::Node256 => self
                .next_by_byte(byte as usize + 1)
                .or_else(|| self.previous_by_byte(byte as usize)),
        }
    }

    /// Children in ascending byte order.
    #[inline]
    pub fn children(&self) -> Children<'a> {
        Children {
            node: *self,
            last: None,
        }
    }
}

/// Iterator over a node's children in key order.
pub struct Children<'a> {
    node: NodeView<'a>,
    last: Option<Option<ChildEntry>>,
}

impl<'a> Iterator for Children<'a> {
    type Item = ChildEntry;

    fn next(&mut self) -> Option<ChildEntry> {
        let next = match self.last {
            None => self.node.first_child(),
            Some(None) => None,
            Some(Some(prev)) => self.node.child_after(prev.pos as isize, prev.byte),
        };
        self.last = Some(next);
        next
    }
}

// =============================================================================
// Write view
// =============================================================================

/// Mutable typed view over a node buffer.
pub struct NodeViewMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> NodeViewMut<'a> {
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        Self { buf }
    }

    #[inline]
    pub fn view(&self) -> NodeView<'_> {
        NodeView::new(&self.buf[..])
    }

    /// Writes a fresh header for a buffer of exactly `node_size(..)` bytes.
    ///
    /// The body is cleared, the reference count starts at 1, counts at 0.
    pub fn init(&mut self, node_type: NodeType, prefix_len: usize, value_len: usize) {
        debug_assert_eq!(self.buf.len(), node_size(node_type, prefix_len, value_len));
        let kind = node_type.kind();
        let base = kind.base_size();
        self.buf[..base].fill(0);
        self.buf[OFF_TYPE] = node_type.0;
        write_u32(self.buf, OFF_REF_COUNT, 1);
        let mut tail = base;
        if prefix_len >= EXTENDED_PREFIX as usize {
            write_u16(self.buf, OFF_PREFIX_LEN, EXTENDED_PREFIX);
            let len = u32::try_from(prefix_len).unwrap_or_else(|_| panic!("key prefix too long"));
            write_u32(self.buf, base, len);
            tail += 4;
        } else {
            write_u16(self.buf, OFF_PREFIX_LEN, prefix_len as u16);
        }
        if node_type.is_leaf() {
            let len = u32::try_from(value_len).unwrap_or_else(|_| panic!("value too long"));
            write_u32(self.buf, tail, len);
        }
        if kind == NodeKind::Node48 {
            self.buf[HEADER_SIZE..HEADER_SIZE + 256].fill(EMPTY_INDEX);
        }
    }

    #[inline]
    pub fn set_child_count(&mut self, count: usize) {
        debug_assert!(count <= self.view().kind().max_children());
        write_u16(self.buf, OFF_CHILD_COUNT, count as u16);
    }

    #[inline]
    pub fn set_ref_count(&mut self, count: u32) {
        write_u32(self.buf, OFF_REF_COUNT, count);
    }

    #[inline]
    pub fn set_recursive_child_count(&mut self, count: u64) {
        write_u64(self.buf, OFF_RECURSIVE, count);
    }

    pub fn prefix_mut(&mut self) -> &mut [u8] {
        let view = self.view();
        let (off, len) = (view.prefix_offset(), view.prefix_len());
        &mut self.buf[off..off + len]
    }

    pub fn value_mut(&mut self) -> &mut [u8] {
        let view = self.view();
        let off = view.prefix_offset() + view.prefix_len();
        let len = view.value_len();
        &mut self.buf[off..off + len]
    }

    #[inline]
    pub fn set_slot(&mut self, pos: usize, slot: Slot) {
        let off = self.view().slot_offset(pos);
        slot.encode(&mut self.buf[off..off + SLOT_SIZE]);
    }

    /// Opens an empty slot for `byte` at `insert_pos` (from [`NodeView::find`]).
    ///
    /// Returns the slot position. Capacity must have been checked by the caller.
    pub fn insert_child_raw(&mut self, insert_pos: usize, byte: u8) -> usize {
        let view = self.view();
        let kind = view.kind();
        let count = view.child_count();
        debug_assert!(!view.is_full());
        let pos = match kind {
            NodeKind::Node4 | NodeKind::Node16 => {
                let slots = kind.slots_offset();
                self.buf.copy_within(
                    HEADER_SIZE + insert_pos..HEADER_SIZE + count,
                    HEADER_SIZE + insert_pos + 1,
                );
                self.buf.copy_within(
                    slots + insert_pos * SLOT_SIZE..slots + count * SLOT_SIZE,
                    slots + (insert_pos + 1) * SLOT_SIZE,
                );
                self.buf[HEADER_SIZE + insert_pos] = byte;
                insert_pos
            }
            NodeKind::Node48 => {
                self.buf[HEADER_SIZE + byte as usize] = count as u8;
                count
            }
            NodeKind::Node256 => byte as usize,
            NodeKind::Leaf => unreachable!("insert into leaf node"),
        };
        self.set_slot(pos, Slot::Empty);
        self.set_child_count(count + 1);
        pos
    }

    /// Appends a child. Calls must come in ascending byte order.
    pub fn append_child(&mut self, byte: u8, slot: Slot) {
        let view = self.view();
        let kind = view.kind();
        let count = view.child_count();
        match kind {
            NodeKind::Node4 | NodeKind::Node16 => {
                debug_assert!(count == 0 || view.keys()[count - 1] < byte);
                self.buf[HEADER_SIZE + count] = byte;
                self.set_slot(count, slot);
            }
            NodeKind::Node48 => {
                self.buf[HEADER_SIZE + byte as usize] = count as u8;
                self.set_slot(count, slot);
            }
            NodeKind::Node256 => self.set_slot(byte as usize, slot),
            NodeKind::Leaf => unreachable!("append to leaf node"),
        }
        self.set_child_count(count + 1);
    }

    /// Drops all children without touching reference counts.
    pub fn clear_children(&mut self) {
        let kind = self.view().kind();
        self.buf[HEADER_SIZE..kind.base_size()].fill(0);
        if kind == NodeKind::Node48 {
            self.buf[HEADER_SIZE..HEADER_SIZE + 256].fill(EMPTY_INDEX);
        }
        self.set_child_count(0);
    }

    /// Copies keys, slots, child count and recursive count from `src` (same class).
    pub fn copy_body_from(&mut self, src: NodeView<'_>) {
        let kind = src.kind();
        debug_assert_eq!(kind, self.view().kind());
        self.buf[HEADER_SIZE..kind.base_size()]
            .copy_from_slice(&src.buf[HEADER_SIZE..kind.base_size()]);
        write_u16(self.buf, OFF_CHILD_COUNT, src.child_count() as u16);
        self.set_recursive_child_count(src.recursive_child_count());
    }
}
