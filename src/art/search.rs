//! Lookups and ordered navigation over a cursor stack.

use smallvec::SmallVec;

use super::node::{NodeKind, Slot};
use super::{Art, CursorItem, CursorStack, FindResult, RootId};
use crate::allocator::{NodeAllocator, NodeId};

/// Length of the common prefix of `a` and `b`.
#[inline]
pub(crate) fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl<A: NodeAllocator> Art<A> {
    /// Positions `stack` on `key`; clears it and returns `false` when absent.
    pub(crate) fn find_exact(&self, root: RootId, stack: &mut CursorStack, key: &[u8]) -> bool {
        stack.clear();
        let Some(mut top) = self.root_node(root) else {
            return false;
        };
        let mut key_offset = 0usize;
        loop {
            let node = self.node(top);
            let prefix = node.prefix();
            if key.len() - key_offset < prefix.len()
                || key[key_offset..key_offset + prefix.len()] != *prefix
            {
                stack.clear();
                return false;
            }
            key_offset += prefix.len();
            if key_offset == key.len() {
                if node.is_leaf() {
                    stack.push(CursorItem::own_value(top, key_offset));
                    return true;
                }
                stack.clear();
                return false;
            }
            let b = key[key_offset];
            let Ok(pos) = node.find(b) else {
                stack.clear();
                return false;
            };
            key_offset += 1;
            stack.push(CursorItem::slot(top, key_offset, pos, b));
            match node.slot(pos) {
                Slot::Child(child) => top = child,
                Slot::Inline(_) if key_offset == key.len() => return true,
                Slot::Inline(_) => {
                    stack.clear();
                    return false;
                }
                Slot::Empty => unreachable!("found byte {b} with empty slot"),
            }
        }
    }

    /// Neighbour search for `key_prefix ++ key`, limited to keys starting
    /// with `key_prefix`.
    pub(crate) fn find(
        &self,
        root: RootId,
        stack: &mut CursorStack,
        key_prefix: &[u8],
        key: &[u8],
    ) -> FindResult {
        stack.clear();
        let full: SmallVec<[u8; 64]> = key_prefix.iter().chain(key).copied().collect();
        let key = &full[..];
        let scope = key_prefix.len();
        let Some(mut top) = self.root_node(root) else {
            return FindResult::NotFound;
        };
        let mut key_offset = 0usize;
        loop {
            let node = self.node(top);
            let prefix = node.prefix();
            let key_rest = key.len() - key_offset;
            let common = key_rest.min(prefix.len());
            let diff = common_prefix_len(&key[key_offset..key_offset + common], &prefix[..common]);
            if diff < prefix.len() {
                if key_offset + diff < scope {
                    stack.clear();
                    return FindResult::NotFound;
                }
                // Everything below `top` sorts on one side of the key.
                if diff < key_rest && prefix[diff] < key[key_offset + diff] {
                    self.push_right_most(top, key_offset, stack);
                    return FindResult::Previous;
                }
                self.push_left_most(top, key_offset, stack);
                return FindResult::Next;
            }
            if diff == key_rest {
                if node.is_leaf() {
                    stack.push(CursorItem::own_value(top, key.len()));
                    return FindResult::Exact;
                }
                self.push_left_most(top, key_offset, stack);
                return FindResult::Next;
            }
            if node.kind() == NodeKind::Leaf {
                key_offset += diff;
                if key_offset >= scope {
                    stack.push(CursorItem::own_value(top, key_offset));
                    return FindResult::Previous;
                }
                stack.clear();
                return FindResult::NotFound;
            }
            let b = key[key_offset + diff];
            key_offset += diff + 1;
            match node.find(b) {
                Ok(pos) => {
                    stack.push(CursorItem::slot(top, key_offset, pos, b));
                    match node.slot(pos) {
                        Slot::Child(child) => top = child,
                        Slot::Inline(_) if key_offset == key.len() => return FindResult::Exact,
                        Slot::Inline(_) if key_offset >= scope => return FindResult::Previous,
                        Slot::Inline(_) => {
                            stack.clear();
                            return FindResult::NotFound;
                        }
                        Slot::Empty => unreachable!("found byte {b} with empty slot"),
                    }
                }
                Err(insert_pos) => {
                    if key_offset <= scope {
                        stack.clear();
                        return FindResult::NotFound;
                    }
                    let Some(near) = node.near_child(b, insert_pos) else {
                        unreachable!("inner node {:?} without children", top);
                    };
                    stack.push(CursorItem::slot(top, key_offset, near.pos, near.byte));
                    let smaller = near.byte < b;
                    if let Slot::Child(child) = near.slot {
                        if smaller {
                            self.push_right_most(child, key_offset, stack);
                        } else {
                            self.push_left_most(child, key_offset, stack);
                        }
                    }
                    return if smaller {
                        FindResult::Previous
                    } else {
                        FindResult::Next
                    };
                }
            }
        }
    }

    /// Positions on the smallest key starting with `key_prefix`.
    pub(crate) fn find_first(
        &self,
        root: RootId,
        stack: &mut CursorStack,
        key_prefix: &[u8],
    ) -> bool {
        self.find_prefix_edge(root, stack, key_prefix, false)
    }

    /// Positions on the largest key starting with `key_prefix`.
    pub(crate) fn find_last(
        &self,
        root: RootId,
        stack: &mut CursorStack,
        key_prefix: &[u8],
    ) -> bool {
        self.find_prefix_edge(root, stack, key_prefix, true)
    }

    fn find_prefix_edge(
        &self,
        root: RootId,
        stack: &mut CursorStack,
        key_prefix: &[u8],
        last: bool,
    ) -> bool {
        stack.clear();
        let Some(mut top) = self.root_node(root) else {
            return false;
        };
        let mut key_offset = 0usize;
        loop {
            let node = self.node(top);
            let prefix = node.prefix();
            let key_rest = key_prefix.len() - key_offset;
            let common = key_rest.min(prefix.len());
            if key_prefix[key_offset..key_offset + common] != prefix[..common] {
                stack.clear();
                return false;
            }
            if common == key_rest {
                if last {
                    self.push_right_most(top, key_offset, stack);
                } else {
                    self.push_left_most(top, key_offset, stack);
                }
                return true;
            }
            if node.kind() == NodeKind::Leaf {
                stack.clear();
                return false;
            }
            key_offset += prefix.len();
            let b = key_prefix[key_offset];
            let Ok(pos) = node.find(b) else {
                stack.clear();
                return false;
            };
            key_offset += 1;
            stack.push(CursorItem::slot(top, key_offset, pos, b));
            match node.slot(pos) {
                Slot::Child(child) => top = child,
                Slot::Inline(_) if key_offset == key_prefix.len() => return true,
                Slot::Inline(_) => {
                    stack.clear();
                    return false;
                }
                Slot::Empty => unreachable!("found byte {b} with empty slot"),
            }
        }
    }

    /// Descends from `top` to the smallest key below it.
    pub(crate) fn push_left_most(
        &self,
        mut top: NodeId,
        mut key_offset: usize,
        stack: &mut CursorStack,
    ) {
        loop {
            let node = self.node(top);
            key_offset += node.prefix_len();
            if node.is_leaf() {
                stack.push(CursorItem::own_value(top, key_offset));
                return;
            }
            let Some(first) = node.first_child() else {
                unreachable!("inner node {:?} without children", top);
            };
            key_offset += 1;
            stack.push(CursorItem::slot(top, key_offset, first.pos, first.byte));
            match first.slot {
                Slot::Child(child) => top = child,
                _ => return,
            }
        }
    }

    /// Descends from `top` to the largest key below it.
    pub(crate) fn push_right_most(
        &self,
        mut top: NodeId,
        mut key_offset: usize,
        stack: &mut CursorStack,
    ) {
        loop {
            let node = self.node(top);
            key_offset += node.prefix_len();
            let Some(last) = node.last_child() else {
                debug_assert!(node.is_leaf());
                stack.push(CursorItem::own_value(top, key_offset));
                return;
            };
            key_offset += 1;
            stack.push(CursorItem::slot(top, key_offset, last.pos, last.byte));
            match last.slot {
                Slot::Child(child) => top = child,
                _ => return,
            }
        }
    }

    /// Advances to the next key in order. Clears the stack past the end.
    pub(crate) fn move_next(&self, stack: &mut CursorStack) -> bool {
        while let Some(item) = stack.last_mut() {
            let node = self.node(item.node);
            let next = if item.is_own_value() {
                item.key_offset += 1;
                node.first_child()
            } else {
                node.child_after(item.pos as isize, item.byte)
            };
            match next {
                Some(child) => {
                    item.pos = child.pos as i16;
                    item.byte = child.byte;
                    let key_offset = item.key_offset as usize;
                    if let Slot::Child(c) = child.slot {
                        self.push_left_most(c, key_offset, stack);
                    }
                    return true;
                }
                None => {
                    stack.pop();
                }
            }
        }
        false
    }

    /// Steps back to the previous key in order. Clears the stack before the start.
    pub(crate) fn move_previous(&self, stack: &mut CursorStack) -> bool {
        while let Some(item) = stack.last_mut() {
            if item.is_own_value() {
                stack.pop();
                continue;
            }
            let node = self.node(item.node);
            match node.child_before(item.slot_pos(), item.byte) {
                Some(child) => {
                    item.pos = child.pos as i16;
                    item.byte = child.byte;
                    let key_offset = item.key_offset as usize;
                    if let Slot::Child(c) = child.slot {
                        self.push_right_most(c, key_offset, stack);
                    }
                    return true;
                }
                None if node.is_leaf() => {
                    item.pos = -1;
                    item.key_offset -= 1;
                    return true;
                }
                None => {
                    stack.pop();
                }
            }
        }
        false
    }
}
