//! Ordinal positions: key index of a cursor and positioning by index.

use super::node::Slot;
use super::{Art, CursorItem, CursorStack, RootId};
use crate::allocator::NodeAllocator;

impl<A: NodeAllocator> Art<A> {
    /// Zero-based index of the key `stack` points at.
    pub(crate) fn calc_index(&self, stack: &[CursorItem]) -> Option<u64> {
        if stack.is_empty() {
            return None;
        }
        let mut index = 0u64;
        for item in stack {
            if item.is_own_value() {
                return Some(index);
            }
            let node = self.node(item.node);
            if node.is_leaf() {
                index += 1;
            }
            index += node
                .children()
                .take_while(|c| c.byte < item.byte)
                .map(|c| self.slot_weight(c.slot))
                .sum::<u64>();
        }
        Some(index)
    }

    /// Positions `stack` on the key with ordinal `index`.
    pub(crate) fn seek_index(&self, root: RootId, stack: &mut CursorStack, mut index: u64) -> bool {
        stack.clear();
        let Some(mut top) = self.root_node(root) else {
            return false;
        };
        if index >= self.node(top).recursive_child_count() {
            return false;
        }
        let mut key_offset = 0usize;
        loop {
            let node = self.node(top);
            key_offset += node.prefix_len();
            if node.is_leaf() {
                if index == 0 {
                    stack.push(CursorItem::own_value(top, key_offset));
                    return true;
                }
                index -= 1;
            }
            key_offset += 1;
            let mut target = None;
            for child in node.children() {
                let weight = self.slot_weight(child.slot);
                if index < weight {
                    target = Some(child);
                    break;
                }
                index -= weight;
            }
            let Some(child) = target else {
                panic!("recursive child count of {:?} out of sync", top);
            };
            stack.push(CursorItem::slot(top, key_offset, child.pos, child.byte));
            match child.slot {
                Slot::Child(next) => top = next,
                _ => return true,
            }
        }
    }
}
