//! Insertion, in-place value updates and bulk loading.

use smallvec::SmallVec;
use tracing::debug;

use super::node::{is_inlineable, InlineValue, NodeKind, NodeType, Slot};
use super::search::common_prefix_len;
use super::{Art, CursorItem, CursorStack, RootId};
use crate::allocator::{NodeAllocator, NodeId};

impl<A: NodeAllocator> Art<A> {
    /// Leaf node holding `value` under `prefix`.
    fn allocate_leaf(&mut self, prefix: &[u8], value: &[u8]) -> NodeId {
        let leaf =
            self.allocate_node(NodeType::new(NodeKind::Leaf, true), prefix.len(), value.len());
        let mut node = self.node_mut(leaf);
        node.prefix_mut().copy_from_slice(prefix);
        node.value_mut().copy_from_slice(value);
        node.set_recursive_child_count(1);
        leaf
    }

    /// Node4 with IS_LEAF holding `value` and one empty slot for `byte`.
    fn allocate_value_holder(&mut self, prefix: &[u8], value: &[u8], byte: u8) -> NodeId {
        let holder =
            self.allocate_node(NodeType::new(NodeKind::Node4, true), prefix.len(), value.len());
        let mut node = self.node_mut(holder);
        node.prefix_mut().copy_from_slice(prefix);
        node.value_mut().copy_from_slice(value);
        node.insert_child_raw(0, byte);
        node.set_recursive_child_count(1);
        holder
    }

    /// Inserts or updates `key`. Returns `true` when the key was new.
    ///
    /// On return `stack` points at the written key.
    pub(crate) fn upsert(
        &mut self,
        root: RootId,
        stack: &mut CursorStack,
        key: &[u8],
        content: &[u8],
    ) -> bool {
        stack.clear();
        let mut top = self.root_node(root);
        let mut key_offset = 0usize;
        loop {
            let key_rest = key.len() - key_offset;
            let Some(node) = top else {
                // The slot on top of the stack is empty and already private.
                if key_rest == 0 && is_inlineable(content) && !stack.is_empty() {
                    let last = stack[stack.len() - 1];
                    self.write_inline_in_node(&last, content);
                    self.adjust_recursive_child_count(stack, 1);
                    return true;
                }
                let leaf = self.allocate_leaf(&key[key_offset..], content);
                stack.push(CursorItem::own_value(leaf, key.len()));
                let last = stack.len() - 1;
                self.overwrite_node_in_stack(root, stack, last, leaf);
                self.adjust_recursive_child_count(&stack[..last], 1);
                return true;
            };

            let (prefix_len, diff, is_leaf_kind) = {
                let n = self.node(node);
                let prefix = n.prefix();
                let common = key_rest.min(prefix.len());
                let diff =
                    common_prefix_len(&key[key_offset..key_offset + common], &prefix[..common]);
                (prefix.len(), diff, n.kind() == NodeKind::Leaf)
            };

            if diff < prefix_len {
                // Split the prefix: a new Node4 takes the common part.
                self.make_unique(root, stack);
                let own = diff == key_rest;
                let value_len = if own { content.len() } else { 0 };
                let split =
                    self.allocate_node(NodeType::new(NodeKind::Node4, own), diff, value_len);
                let (split_byte, below) = {
                    let n = self.node(node);
                    (n.prefix()[diff], n.recursive_child_count())
                };
                let tail = self.clone_node_with_key_prefix_cut(node, diff as isize + 1);
                {
                    let mut n = self.node_mut(split);
                    n.prefix_mut().copy_from_slice(&key[key_offset..key_offset + diff]);
                    n.append_child(split_byte, Slot::Child(tail));
                    n.set_recursive_child_count(below);
                    if own {
                        n.value_mut().copy_from_slice(content);
                    }
                }
                if own {
                    stack.push(CursorItem::own_value(split, key.len()));
                    self.adjust_recursive_child_count(stack, 1);
                    let last = stack.len() - 1;
                    self.overwrite_node_in_stack(root, stack, last, split);
                    return true;
                }
                key_offset += diff + 1;
                let b = key[key_offset - 1];
                let pos = {
                    let mut n = self.node_mut(split);
                    let insert_pos = match n.view().find(b) {
                        Err(insert_pos) => insert_pos,
                        Ok(_) => unreachable!("split byte {b} already present"),
                    };
                    n.insert_child_raw(insert_pos, b)
                };
                stack.push(CursorItem::slot(split, key_offset, pos, b));
                let last = stack.len() - 1;
                self.overwrite_node_in_stack(root, stack, last, split);
                top = None;
                continue;
            }

            if prefix_len == key_rest {
                stack.push(CursorItem::own_value(node, key.len()));
                let (had_value, same_len) = {
                    let n = self.node(node);
                    (n.is_leaf(), n.value_len() == content.len())
                };
                if had_value && same_len {
                    self.make_unique(root, stack);
                } else {
                    self.make_unique_last_resize(root, stack, content.len());
                }
                let target = stack[stack.len() - 1].node;
                self.node_mut(target).value_mut().copy_from_slice(content);
                if !had_value {
                    self.adjust_recursive_child_count(stack, 1);
                    return true;
                }
                return false;
            }

            let b = key[key_offset + diff];
            if is_leaf_kind {
                // Key runs past a leaf: the leaf becomes a value-carrying Node4.
                self.make_unique(root, stack);
                let holder = {
                    let n = self.node(node);
                    let (prefix, value): (SmallVec<[u8; 32]>, SmallVec<[u8; 32]>) =
                        (n.prefix().into(), n.value().into());
                    self.allocate_value_holder(&prefix, &value, b)
                };
                key_offset += diff + 1;
                stack.push(CursorItem::slot(holder, key_offset, 0, b));
                let last = stack.len() - 1;
                self.overwrite_node_in_stack(root, stack, last, holder);
                top = None;
                continue;
            }

            let found = self.node(node).find(b);
            key_offset += diff + 1;
            match found {
                Ok(pos) => {
                    stack.push(CursorItem::slot(node, key_offset, pos, b));
                    match self.node(node).slot(pos) {
                        Slot::Child(child) => {
                            let plain_leaf = {
                                let c = self.node(child);
                                c.kind() == NodeKind::Leaf && c.prefix_len() == 0
                            };
                            if key.len() == key_offset && is_inlineable(content) && plain_leaf {
                                self.make_unique(root, stack);
                                let last = stack[stack.len() - 1];
                                self.write_inline_in_node(&last, content);
                                return false;
                            }
                            top = Some(child);
                        }
                        Slot::Inline(existing) => {
                            self.make_unique(root, stack);
                            let last = stack[stack.len() - 1];
                            if key.len() == key_offset {
                                if is_inlineable(content) {
                                    self.write_inline_in_node(&last, content);
                                } else {
                                    let leaf = self.allocate_leaf(&[], content);
                                    stack.push(CursorItem::own_value(leaf, key.len()));
                                    let i = stack.len() - 1;
                                    self.overwrite_node_in_stack(root, stack, i, leaf);
                                }
                                return false;
                            }
                            // Inline value on the way down: move it into a holder node.
                            let b = key[key_offset];
                            let holder = self.allocate_value_holder(&[], existing.as_slice(), b);
                            key_offset += 1;
                            stack.push(CursorItem::slot(holder, key_offset, 0, b));
                            let i = stack.len() - 1;
                            self.overwrite_node_in_stack(root, stack, i, holder);
                            top = None;
                        }
                        Slot::Empty => unreachable!("found byte {b} with empty slot"),
                    }
                }
                Err(_) => {
                    self.make_unique(root, stack);
                    let (full, shared) = {
                        let n = self.node(node);
                        (n.is_full(), n.ref_count() > 1)
                    };
                    let target = if full {
                        self.expand_node(node)
                    } else if shared {
                        self.clone_node(node)
                    } else {
                        node
                    };
                    let pos = {
                        let mut n = self.node_mut(target);
                        let insert_pos = match n.view().find(b) {
                            Err(insert_pos) => insert_pos,
                            Ok(_) => unreachable!("byte {b} appeared during insert"),
                        };
                        n.insert_child_raw(insert_pos, b)
                    };
                    stack.push(CursorItem::slot(target, key_offset, pos, b));
                    if target != node {
                        let i = stack.len() - 1;
                        self.overwrite_node_in_stack(root, stack, i, target);
                    }
                    top = None;
                }
            }
        }
    }

    /// Replaces the value of the key `stack` points at.
    pub(crate) fn write_value(&mut self, root: RootId, stack: &mut CursorStack, content: &[u8]) {
        let last = stack.len() - 1;
        let item = stack[last];
        if item.is_own_value() {
            if self.node(item.node).value_len() == content.len() {
                self.make_unique(root, stack);
            } else {
                self.make_unique_last_resize(root, stack, content.len());
            }
            let target = stack[last].node;
            self.node_mut(target).value_mut().copy_from_slice(content);
            return;
        }
        self.make_unique(root, stack);
        let item = stack[last];
        if is_inlineable(content) {
            self.write_inline_in_node(&item, content);
            return;
        }
        let leaf = self.allocate_leaf(&[], content);
        stack.push(CursorItem::own_value(leaf, item.key_offset as usize));
        self.overwrite_node_in_stack(root, stack, last + 1, leaf);
    }

    /// Replaces the contents of `root` with `entries` (strictly ascending keys).
    pub(crate) fn build_tree<K, V>(&mut self, root: RootId, entries: &[(K, V)])
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for pair in entries.windows(2) {
            assert!(
                pair[0].0.as_ref() < pair[1].0.as_ref(),
                "build_tree needs strictly ascending keys"
            );
        }
        let node = (!entries.is_empty()).then(|| self.build_subtree(entries, 0));
        let old = self.root_node(root);
        self.set_root_node(root, node);
        self.dereference(old);
        debug!(root = ?root, keys = entries.len(), "built tree");
    }

    fn build_subtree<K, V>(&mut self, entries: &[(K, V)], depth: usize) -> NodeId
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let first = entries[0].0.as_ref();
        if entries.len() == 1 {
            return self.allocate_leaf(&first[depth..], entries[0].1.as_ref());
        }
        let last = entries[entries.len() - 1].0.as_ref();
        let split = depth + common_prefix_len(&first[depth..], &last[depth..]);
        let own = first.len() == split;
        let rest = if own { &entries[1..] } else { entries };

        let mut groups: SmallVec<[(u8, usize, usize); 16]> = SmallVec::new();
        for (i, (key, _)) in rest.iter().enumerate() {
            let b = key.as_ref()[split];
            match groups.last_mut() {
                Some((byte, _, end)) if *byte == b => *end = i + 1,
                _ => groups.push((b, i, i + 1)),
            }
        }

        let value: &[u8] = if own { entries[0].1.as_ref() } else { &[] };
        let kind = NodeKind::for_child_count(groups.len());
        let node = self.allocate_node(NodeType::new(kind, own), split - depth, value.len());
        {
            let mut n = self.node_mut(node);
            n.prefix_mut().copy_from_slice(&first[depth..split]);
            n.value_mut().copy_from_slice(value);
            n.set_recursive_child_count(entries.len() as u64);
        }
        for (byte, start, end) in groups {
            let group = &rest[start..end];
            let terminal = group.len() == 1 && group[0].0.as_ref().len() == split + 1;
            let slot = if terminal && is_inlineable(group[0].1.as_ref()) {
                Slot::Inline(InlineValue::new(group[0].1.as_ref()))
            } else {
                Slot::Child(self.build_subtree(group, split + 1))
            };
            self.node_mut(node).append_child(byte, slot);
        }
        node
    }
}
