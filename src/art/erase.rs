//! Range erasure with copy-on-write.
//!
//! Erasing `[left, right]` walks both cursor stacks down to the node where
//! they diverge, trims the left path to the end of each node and the right
//! path to the start, and rebuilds the divergence node from what survives.
//! Nodes reachable only through unique paths are edited in place; everything
//! else gets a replacement node.
//!
//! Ownership of a surviving subtree handed up from a deeper level:
//! either it is the original child edited in place (its parent slot still
//! owns it) or it is a fresh node whose single reference moves to the caller.

use smallvec::SmallVec;
use tracing::debug;

use super::node::{NodeKind, NodeType, NodeView, NodeViewMut, Slot};
use super::{Art, CursorItem, CursorStack, RootId};
use crate::allocator::{NodeAllocator, NodeId};

/// Boundary of an erased range inside one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    OwnValue,
    Child(u8),
}

impl Edge {
    #[inline]
    fn of(item: &CursorItem) -> Self {
        if item.is_own_value() {
            Edge::OwnValue
        } else {
            Edge::Child(item.byte)
        }
    }
}

/// A child that stays in the rebuilt node.
#[derive(Clone, Copy)]
struct Kept {
    byte: u8,
    slot: Slot,
    /// Still referenced by the old node; a replacement node must add a reference.
    shared: bool,
}

/// Outcome of erasing part of a subtree.
#[derive(Clone, Copy, Debug)]
struct Trimmed {
    /// What is left of the subtree, if anything.
    node: Option<NodeId>,
    /// Keys removed from the subtree.
    erased: u64,
}

impl<A: NodeAllocator> Art<A> {
    /// Erases every key between the positions of `left` and `right`, inclusive.
    ///
    /// Both stacks must be valid on `root` with `left <= right`; both are
    /// cleared. Returns the number of erased keys.
    pub(crate) fn erase_range(
        &mut self,
        root: RootId,
        left: &mut CursorStack,
        right: &mut CursorStack,
    ) -> u64 {
        debug_assert!(!left.is_empty() && !right.is_empty());
        let mut is_unique = true;
        let mut depth = 0usize;
        let mut trimmed = loop {
            let l = left[depth];
            let r = right[depth];
            debug_assert_eq!(l.node, r.node, "cursors diverge before their keys do");
            if l.pos == r.pos {
                if l.is_own_value() || depth + 1 == left.len() {
                    let edge = Edge::of(&l);
                    break self.erase_range_from_node(is_unique, l.node, edge, None, edge, None);
                }
                if self.node(l.node).ref_count() > 1 {
                    is_unique = false;
                }
                depth += 1;
                continue;
            }
            let down_unique = is_unique && self.node(l.node).ref_count() == 1;
            let left_trimmed = (depth + 1 < left.len())
                .then(|| self.erase_till_end(down_unique, &left[depth + 1..]));
            let right_trimmed = (depth + 1 < right.len())
                .then(|| self.erase_from_start(down_unique, &right[depth + 1..]));
            break self.erase_range_from_node(
                is_unique,
                l.node,
                Edge::of(&l),
                left_trimmed,
                Edge::of(&r),
                right_trimmed,
            );
        };

        if trimmed.node.is_none() && depth > 0 {
            // The whole subtree went away: drop its slot from the parent.
            depth -= 1;
            let parent = left[depth];
            let edge = Edge::of(&parent);
            let gone = Some(trimmed);
            trimmed = self.erase_range_from_node(is_unique, parent.node, edge, gone, edge, None);
        }

        let erased = trimmed.erased;
        self.make_unique_and_overwrite(root, &mut left[..depth], trimmed.node);
        self.adjust_recursive_child_count(&left[..depth], -(erased as i64));
        left.clear();
        right.clear();
        debug!(root = ?root, erased, "erased key range");
        erased
    }

    /// Installs `new_node` where the last frame of `stack` points (or as root).
    fn make_unique_and_overwrite(
        &mut self,
        root: RootId,
        stack: &mut [CursorItem],
        new_node: Option<NodeId>,
    ) {
        let Some(last) = stack.len().checked_sub(1) else {
            let old = self.root_node(root);
            if old != new_node {
                self.set_root_node(root, new_node);
                self.dereference(old);
            }
            return;
        };
        let Some(new_node) = new_node else {
            unreachable!("only the root can become empty");
        };
        let item = stack[last];
        if self.node(item.node).slot(item.slot_pos()) == Slot::Child(new_node) {
            return;
        }
        self.make_unique(root, stack);
        let item = stack[last];
        self.write_child_in_node(&item, new_node);
    }

    /// Erases from the position in `span[0]` to the end of that node,
    /// recursing along the rest of `span`.
    fn erase_till_end(&mut self, down_unique: bool, span: &[CursorItem]) -> Trimmed {
        let item = span[0];
        let unique = down_unique && self.node(item.node).ref_count() == 1;
        let below = (span.len() > 1).then(|| self.erase_till_end(unique, &span[1..]));
        let end = match self.node(item.node).last_child() {
            Some(last) => Edge::Child(last.byte),
            None => Edge::OwnValue,
        };
        self.erase_range_from_node(down_unique, item.node, Edge::of(&item), below, end, None)
    }

    /// Erases from the start of the node in `span[0]` up to its position,
    /// recursing along the rest of `span`.
    fn erase_from_start(&mut self, down_unique: bool, span: &[CursorItem]) -> Trimmed {
        let item = span[0];
        let unique = down_unique && self.node(item.node).ref_count() == 1;
        let below = (span.len() > 1).then(|| self.erase_from_start(unique, &span[1..]));
        let start = {
            let node = self.node(item.node);
            match node.first_child() {
                Some(first) if !node.is_leaf() => Edge::Child(first.byte),
                _ => Edge::OwnValue,
            }
        };
        self.erase_range_from_node(down_unique, item.node, start, None, Edge::of(&item), below)
    }

    /// Removes `[from, to]` from `node`. A child at an edge that was trimmed
    /// by a deeper level is replaced by what is left of it and contributes
    /// only the keys erased below; every other child in range counts whole.
    fn erase_range_from_node(
        &mut self,
        can_be_inplace: bool,
        node: NodeId,
        from: Edge,
        left: Option<Trimmed>,
        to: Edge,
        right: Option<Trimmed>,
    ) -> Trimmed {
        let view = self.node(node);
        if view.kind() == NodeKind::Leaf {
            debug_assert_eq!((from, to), (Edge::OwnValue, Edge::OwnValue));
            return Trimmed {
                node: None,
                erased: 1,
            };
        }
        let erase_own = from == Edge::OwnValue;
        debug_assert!(!erase_own || view.is_leaf());
        let range = match (from, to) {
            (_, Edge::OwnValue) => None,
            (Edge::OwnValue, Edge::Child(hi)) => Some((0u8, hi)),
            (Edge::Child(lo), Edge::Child(hi)) => Some((lo, hi)),
        };
        let left_node = left.and_then(|t| t.node);
        let right_node = right.and_then(|t| t.node);

        let mut erased = u64::from(erase_own);
        let mut kept: SmallVec<[Kept; 16]> = SmallVec::new();
        let mut released: SmallVec<[NodeId; 8]> = SmallVec::new();
        for child in view.children() {
            let in_range = range.is_some_and(|(lo, hi)| (lo..=hi).contains(&child.byte));
            if !in_range {
                kept.push(Kept {
                    byte: child.byte,
                    slot: child.slot,
                    shared: true,
                });
                continue;
            }
            released.extend(child.slot.child());
            let edge = if from == Edge::Child(child.byte) && left.is_some() {
                left
            } else if to == Edge::Child(child.byte) {
                right
            } else {
                None
            };
            let Some(edge) = edge else {
                erased += self.slot_weight(child.slot);
                continue;
            };
            erased += edge.erased;
            if let Some(survivor) = edge.node {
                kept.push(Kept {
                    byte: child.byte,
                    slot: Slot::Child(survivor),
                    shared: child.slot == Slot::Child(survivor),
                });
            }
        }

        let is_leaf = view.is_leaf() && !erase_own;
        let old_type = view.node_type();
        let old_count = view.recursive_child_count();
        let prefix_len = view.prefix_len();
        let value_len = if is_leaf { view.value_len() } else { 0 };
        let unique = can_be_inplace && view.ref_count() == 1;
        let count = kept.len();

        if count == 0 && !is_leaf {
            return Trimmed { node: None, erased };
        }

        if count == 1 && !is_leaf {
            // A lone child merges upward, taking over this node's prefix.
            let only = kept[0];
            let merged = match only.slot {
                Slot::Inline(value) => {
                    let leaf = self.allocate_node(
                        NodeType::new(NodeKind::Leaf, true),
                        prefix_len + 1,
                        value.len(),
                    );
                    let (src, dst) = self.alloc.pair_mut(node, leaf);
                    let mut dst = NodeViewMut::new(dst);
                    let prefix = dst.prefix_mut();
                    prefix[..prefix_len].copy_from_slice(NodeView::new(src).prefix());
                    prefix[prefix_len] = only.byte;
                    dst.value_mut().copy_from_slice(value.as_slice());
                    dst.set_recursive_child_count(1);
                    leaf
                }
                Slot::Child(child) => {
                    let merged =
                        self.clone_node_with_key_prefix_cut(child, -(prefix_len as isize + 1));
                    {
                        let (src, dst) = self.alloc.pair_mut(node, merged);
                        let mut dst = NodeViewMut::new(dst);
                        let prefix = dst.prefix_mut();
                        prefix[..prefix_len].copy_from_slice(NodeView::new(src).prefix());
                        prefix[prefix_len] = only.byte;
                    }
                    if !only.shared {
                        self.dereference(Some(child));
                    }
                    merged
                }
                Slot::Empty => unreachable!("empty slot among children"),
            };
            return Trimmed {
                node: Some(merged),
                erased,
            };
        }

        let new_type = NodeType::new(NodeKind::for_child_count(count), is_leaf);
        if unique && new_type == old_type {
            for original in released {
                if Some(original) != left_node && Some(original) != right_node {
                    self.dereference(Some(original));
                }
            }
            let mut n = self.node_mut(node);
            n.clear_children();
            for k in &kept {
                n.append_child(k.byte, k.slot);
            }
            n.set_recursive_child_count(old_count - erased);
            return Trimmed {
                node: Some(node),
                erased,
            };
        }

        let replacement = self.allocate_node(new_type, prefix_len, value_len);
        {
            let (src, dst) = self.alloc.pair_mut(node, replacement);
            let src = NodeView::new(src);
            let mut dst = NodeViewMut::new(dst);
            dst.prefix_mut().copy_from_slice(src.prefix());
            if is_leaf {
                dst.value_mut().copy_from_slice(src.value());
            }
            for k in &kept {
                dst.append_child(k.byte, k.slot);
            }
            dst.set_recursive_child_count(old_count - erased);
        }
        for k in &kept {
            if let (true, Slot::Child(child)) = (k.shared, k.slot) {
                self.reference(child);
            }
        }
        Trimmed {
            node: Some(replacement),
            erased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn filled(keys: &[Vec<u8>]) -> (Art, RootId) {
        let mut art = Art::new();
        let root = art.create_empty_root();
        let mut c = art.create_cursor(root);
        for (i, key) in keys.iter().enumerate() {
            let value = if i % 2 == 0 { vec![i as u8] } else { vec![i as u8; 9] };
            c.upsert(&mut art, key, &value);
        }
        (art, root)
    }

    fn keys_of(art: &Art, root: RootId) -> Vec<Vec<u8>> {
        let mut c = art.create_cursor(root);
        let mut out = Vec::new();
        if c.find_first(art, b"") {
            out.push(c.key(art));
            while c.move_next(art) {
                out.push(c.key(art));
            }
        }
        out
    }

    fn sample_keys() -> Vec<Vec<u8>> {
        let mut keys = BTreeMap::new();
        for i in 0..120u32 {
            keys.insert(format!("{:03}", i * 3).into_bytes(), ());
            if i % 5 == 0 {
                keys.insert(format!("{:03}x", i * 3).into_bytes(), ());
            }
        }
        keys.into_keys().collect()
    }

    #[test]
    fn test_erase_every_subrange_small() {
        let keys: Vec<Vec<u8>> = [&b"a"[..], b"ab", b"abc", b"abd", b"b", b"bb", b"c"]
            .iter()
            .map(|k| k.to_vec())
            .collect();
        for lo in 0..keys.len() {
            for hi in lo..keys.len() {
                let (mut art, root) = filled(&keys);
                let mut left = art.create_cursor(root);
                let mut right = art.create_cursor(root);
                assert!(left.seek_index(&art, lo as u64));
                assert!(right.seek_index(&art, hi as u64));
                assert_eq!(left.erase_to(&mut art, &mut right), (hi - lo + 1) as u64);
                let mut expected = keys.clone();
                expected.drain(lo..=hi);
                assert_eq!(keys_of(&art, root), expected, "range {lo}..={hi}");
                art.structure_check(root);
            }
        }
    }

    #[test]
    fn test_erase_range_preserves_snapshot() {
        let keys = sample_keys();
        let (mut art, root) = filled(&keys);
        let snapshot = art.clone_root(root);
        let before = keys_of(&art, snapshot);

        let mut left = art.create_cursor(root);
        let mut right = art.create_cursor(root);
        assert!(left.seek_index(&art, 10));
        assert!(right.seek_index(&art, 100));
        assert_eq!(left.erase_to(&mut art, &mut right), 91);

        assert_eq!(keys_of(&art, snapshot), before);
        art.structure_check(snapshot);
        let mut expected = keys.clone();
        expected.drain(10..=100);
        assert_eq!(keys_of(&art, root), expected);
        art.structure_check(root);

        art.dereference_root(snapshot);
        art.dereference_root(root);
        assert_eq!(art.allocator().live_allocations(), 0);
    }

    #[test]
    fn test_erase_all_and_single() {
        let keys = sample_keys();
        let (mut art, root) = filled(&keys);
        let mut c = art.create_cursor(root);
        assert!(c.find_exact(&art, b"015x"));
        c.erase(&mut art);
        assert!(!c.is_valid());
        assert!(!c.find_exact(&art, b"015x"));
        assert_eq!(art.key_count(root), keys.len() as u64 - 1);
        art.structure_check(root);

        let mut left = art.create_cursor(root);
        let mut right = art.create_cursor(root);
        assert!(left.find_first(&art, b""));
        assert!(right.find_last(&art, b""));
        left.erase_to(&mut art, &mut right);
        assert!(art.root(root).is_empty());
        assert_eq!(art.allocator().live_allocations(), 0);
    }

    #[test]
    fn test_erase_collapses_single_child() {
        let keys: Vec<Vec<u8>> = vec![b"prefix-a".to_vec(), b"prefix-b".to_vec()];
        let (mut art, root) = filled(&keys);
        let mut c = art.create_cursor(root);
        assert!(c.find_exact(&art, b"prefix-a"));
        c.erase(&mut art);
        let stats = art.memory_stats(root);
        assert_eq!(stats.node4_count, 0);
        assert_eq!(stats.leaf_count, 1);
        assert!(c.find_exact(&art, b"prefix-b"));
        assert_eq!(art.verify_integrity(root), Vec::<String>::new());
        art.structure_check(root);
    }

    #[test]
    fn test_erase_range_counts_keys_trimmed_below() {
        let mut keys = Vec::new();
        for first in b'a'..=b'i' {
            keys.push(vec![first]);
            keys.push(vec![first, b'1']);
            keys.push(vec![first, b'2']);
        }
        let (mut art, root) = filled(&keys);
        assert_eq!(art.key_count(root), 27);

        let mut left = art.create_cursor(root);
        let mut right = art.create_cursor(root);
        assert!(left.seek_index(&art, 2));
        assert!(right.seek_index(&art, 23));
        assert_eq!(left.erase_to(&mut art, &mut right), 22);

        let mut expected = keys.clone();
        expected.drain(2..=23);
        assert_eq!(keys_of(&art, root), expected);
        assert_eq!(art.key_count(root), 5);
        assert_eq!(art.verify_integrity(root), Vec::<String>::new());
        art.structure_check(root);

        let mut c = art.create_cursor(root);
        for (i, key) in expected.iter().enumerate() {
            assert!(c.find_exact(&art, key));
            assert_eq!(c.calc_index(&art), Some(i as u64));
        }
        art.dereference_root(root);
        assert_eq!(art.allocator().live_allocations(), 0);
    }

    #[test]
    fn test_erase_range_counts_keys_trimmed_below_shared() {
        let mut keys = Vec::new();
        for first in b'a'..=b'i' {
            keys.push(vec![first]);
            keys.push(vec![first, b'1']);
            keys.push(vec![first, b'2']);
        }
        let (mut art, root) = filled(&keys);
        let snapshot = art.clone_root(root);

        let mut left = art.create_cursor(root);
        let mut right = art.create_cursor(root);
        assert!(left.seek_index(&art, 4));
        assert!(right.seek_index(&art, 19));
        assert_eq!(left.erase_to(&mut art, &mut right), 16);
        assert_eq!(art.key_count(root), 11);
        assert_eq!(art.verify_integrity(root), Vec::<String>::new());
        assert_eq!(keys_of(&art, snapshot), keys);
        assert_eq!(art.verify_integrity(snapshot), Vec::<String>::new());

        art.dereference_root(snapshot);
        art.dereference_root(root);
        assert_eq!(art.allocator().live_allocations(), 0);
    }
}
