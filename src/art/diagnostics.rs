//! Introspection for troubleshooting and tests: structural checks, per-node
//! statistics and a textual dump.

use std::fmt::Write as _;

use super::node::{NodeKind, Slot, EMPTY_INDEX};
use super::{Art, RootId};
use crate::allocator::{NodeAllocator, NodeId};

/// Shape of one node, as reported by [`Art::iterate_node_info`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub depth: usize,
    pub kind: NodeKind,
    pub child_count: usize,
    pub recursive_child_count: u64,
    pub has_leaf_value: bool,
    pub prefix_len: usize,
    pub byte_size: usize,
    pub max_child_count: usize,
    pub ref_count: u32,
}

/// Aggregate statistics over the nodes reachable from a root.
///
/// Shared subtrees are counted once per path that reaches them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtMemoryStats {
    pub leaf_count: usize,
    pub node4_count: usize,
    pub node16_count: usize,
    pub node48_count: usize,
    pub node256_count: usize,
    /// Values stored directly in a parent slot.
    pub inline_values: usize,
    /// Nodes carrying their own value.
    pub node_values: usize,
    pub total_bytes: usize,
    pub prefix_bytes: usize,
    pub value_bytes: usize,
    /// Occupied slots over available slots, summed over inner nodes.
    pub used_slots: usize,
    pub available_slots: usize,
    pub max_depth: usize,
    /// Nodes reachable from more than one parent or root.
    pub shared_nodes: usize,
}

impl ArtMemoryStats {
    pub fn node_count(&self) -> usize {
        self.leaf_count
            + self.node4_count
            + self.node16_count
            + self.node48_count
            + self.node256_count
    }

    /// Fraction of slots in use, 1.0 for a tree without inner nodes.
    pub fn fill_ratio(&self) -> f64 {
        if self.available_slots == 0 {
            1.0
        } else {
            self.used_slots as f64 / self.available_slots as f64
        }
    }
}

impl<A: NodeAllocator> Art<A> {
    /// Calls `f` for every node under `root`, parents before children.
    pub fn iterate_node_info<F: FnMut(&NodeInfo)>(&self, root: RootId, mut f: F) {
        let Some(top) = self.root_node(root) else {
            return;
        };
        let mut work: Vec<(NodeId, usize)> = vec![(top, 0)];
        while let Some((id, depth)) = work.pop() {
            let node = self.node(id);
            f(&NodeInfo {
                depth,
                kind: node.kind(),
                child_count: node.child_count(),
                recursive_child_count: node.recursive_child_count(),
                has_leaf_value: node.is_leaf(),
                prefix_len: node.prefix_len(),
                byte_size: node.byte_size(),
                max_child_count: node.kind().max_children(),
                ref_count: node.ref_count(),
            });
            let children: Vec<NodeId> = node.children().filter_map(|c| c.slot.child()).collect();
            work.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
    }

    pub fn memory_stats(&self, root: RootId) -> ArtMemoryStats {
        let mut stats = ArtMemoryStats::default();
        let mut value_bytes = 0usize;
        let mut inline_values = 0usize;
        if let Some(top) = self.root_node(root) {
            let mut work = vec![top];
            while let Some(id) = work.pop() {
                let node = self.node(id);
                value_bytes += node.value_len();
                for child in node.children() {
                    match child.slot {
                        Slot::Inline(value) => {
                            inline_values += 1;
                            value_bytes += value.len();
                        }
                        Slot::Child(next) => work.push(next),
                        Slot::Empty => {}
                    }
                }
            }
        }
        self.iterate_node_info(root, |info| {
            match info.kind {
                NodeKind::Leaf => stats.leaf_count += 1,
                NodeKind::Node4 => stats.node4_count += 1,
                NodeKind::Node16 => stats.node16_count += 1,
                NodeKind::Node48 => stats.node48_count += 1,
                NodeKind::Node256 => stats.node256_count += 1,
            }
            if info.has_leaf_value {
                stats.node_values += 1;
            }
            if info.ref_count > 1 {
                stats.shared_nodes += 1;
            }
            if info.kind != NodeKind::Leaf {
                stats.used_slots += info.child_count;
                stats.available_slots += info.max_child_count;
            }
            stats.total_bytes += info.byte_size;
            stats.prefix_bytes += info.prefix_len;
            stats.max_depth = stats.max_depth.max(info.depth);
        });
        stats.inline_values = inline_values;
        stats.value_bytes = value_bytes;
        stats
    }

    /// Checks every structural invariant under `root`; returns the violations.
    pub fn verify_integrity(&self, root: RootId) -> Vec<String> {
        let mut issues = Vec::new();
        if let Some(top) = self.root_node(root) {
            self.verify_node(top, &mut Vec::new(), &mut issues);
        }
        issues
    }

    /// Returns the subtree's key count as the node claims it, after checking.
    fn verify_node(&self, id: NodeId, path: &mut Vec<u8>, issues: &mut Vec<String>) -> u64 {
        let node = self.node(id);
        let kind = node.kind();
        let count = node.child_count();
        let depth = path.len();
        path.extend_from_slice(node.prefix());

        if node.ref_count() == 0 {
            issues.push(format!("{id:?} at {path:?} has reference count 0"));
        }
        if kind == NodeKind::Leaf && !node.is_leaf() {
            issues.push(format!("{id:?} at {path:?} is a Leaf without a value"));
        }
        if count > kind.max_children() {
            issues.push(format!(
                "{kind:?} {id:?} has {count} children (max {})",
                kind.max_children()
            ));
        }
        if kind != NodeKind::Leaf {
            let needed = if node.is_leaf() { 1 } else { 2 };
            if count < needed {
                issues.push(format!(
                    "{kind:?} {id:?} at {path:?} is underfull with {count} children"
                ));
            }
        }

        match kind {
            NodeKind::Leaf => {}
            NodeKind::Node4 | NodeKind::Node16 => {
                if node.keys().windows(2).any(|w| w[0] >= w[1]) {
                    issues.push(format!("{kind:?} {id:?} keys not ascending: {:?}", node.keys()));
                }
            }
            NodeKind::Node48 => {
                let mut seen = [false; 48];
                let mut mapped = 0usize;
                for byte in 0..=255u8 {
                    let idx = node.index48(byte);
                    if idx == EMPTY_INDEX {
                        continue;
                    }
                    mapped += 1;
                    let idx = idx as usize;
                    if idx >= count {
                        issues.push(format!("Node48 {id:?} maps byte {byte} to {idx} >= {count}"));
                    } else if seen[idx] {
                        issues.push(format!("Node48 {id:?} maps slot {idx} twice"));
                    } else {
                        seen[idx] = true;
                    }
                }
                if mapped != count {
                    issues.push(format!(
                        "Node48 {id:?} has {mapped} mapped bytes but child_count={count}"
                    ));
                }
            }
            NodeKind::Node256 => {
                let occupied = (0..256).filter(|&pos| node.slot(pos) != Slot::Empty).count();
                if occupied != count {
                    issues.push(format!(
                        "Node256 {id:?} has {occupied} occupied slots but child_count={count}"
                    ));
                }
            }
        }

        let mut actual = u64::from(node.is_leaf());
        for child in node.children() {
            path.push(child.byte);
            match child.slot {
                Slot::Empty => issues.push(format!(
                    "{kind:?} {id:?} has an empty slot for byte {}",
                    child.byte
                )),
                Slot::Inline(_) => actual += 1,
                Slot::Child(next) => actual += self.verify_node(next, path, issues),
            }
            path.pop();
        }
        let claimed = node.recursive_child_count();
        if claimed != actual {
            issues.push(format!(
                "{kind:?} {id:?} at {path:?} claims {claimed} keys, subtree holds {actual}"
            ));
        }
        path.truncate(depth);
        claimed
    }

    /// Panics listing every violation; otherwise returns the key count.
    pub fn structure_check(&self, root: RootId) -> u64 {
        let issues = self.verify_integrity(root);
        if !issues.is_empty() {
            panic!("tree {:?} is inconsistent:\n{}", root, issues.join("\n"));
        }
        self.key_count(root)
    }

    /// Indented dump of the tree under `root`.
    pub fn debug_string(&self, root: RootId) -> String {
        let mut out = String::new();
        let Some(top) = self.root_node(root) else {
            out.push_str("(empty)\n");
            return out;
        };
        self.dump_node(top, 0, &mut out);
        out
    }

    pub fn debug_print(&self, root: RootId) {
        println!("=== ART {:?} ===", root);
        print!("{}", self.debug_string(root));
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        let _ = write!(
            out,
            "{indent}{:?} {:?} rc={} keys={} prefix={:?}",
            node.node_type(),
            id,
            node.ref_count(),
            node.recursive_child_count(),
            String::from_utf8_lossy(node.prefix()),
        );
        if node.is_leaf() {
            let _ = write!(out, " value={:?}", node.value());
        }
        out.push('\n');
        for child in node.children() {
            match child.slot {
                Slot::Inline(value) => {
                    let _ = writeln!(
                        out,
                        "{indent}  [{:#04x}] inline {:?}",
                        child.byte,
                        value.as_slice()
                    );
                }
                Slot::Child(next) => {
                    let _ = writeln!(out, "{indent}  [{:#04x}] ->", child.byte);
                    self.dump_node(next, depth + 2, out);
                }
                Slot::Empty => {
                    let _ = writeln!(out, "{indent}  [{:#04x}] <empty>", child.byte);
                }
            }
        }
    }
}
