//! # artkv
//!
//! Copy-on-write, reference-counted Adaptive Radix Tree: the in-memory storage
//! core of an embedded key-value database.
//!
//! Keys and values are arbitrary byte strings ordered lexicographically. Every
//! tree version is a root handle; cloning a root is O(1) and shares all nodes,
//! writers clone shared nodes along the path they modify. Values of up to 7
//! bytes live directly inside the parent's child slot.
//!
//! ## Example
//!
//! ```rust
//! use artkv::{Art, FindResult};
//!
//! let mut art = Art::new();
//! let root = art.create_empty_root();
//! let mut cursor = art.create_cursor(root);
//! cursor.upsert(&mut art, b"hello", b"1");
//! cursor.upsert(&mut art, b"world", b"a longer value");
//!
//! let snapshot = art.clone_root(root);
//! cursor.upsert(&mut art, b"help", b"2");
//! assert_eq!(art.key_count(root), 3);
//! assert_eq!(art.key_count(snapshot), 2);
//!
//! let mut reader = art.create_cursor(snapshot);
//! assert_eq!(reader.find(&art, b"help"), FindResult::Previous);
//! assert_eq!(reader.key(&art), b"hello");
//! assert_eq!(reader.value(&art), b"1");
//! ```
//!
//! [`kv::KeyValueDb`] wraps the engine in snapshot-isolated transactions.

#![forbid(unsafe_code)]

pub mod allocator;
pub mod art;
mod error;
pub mod kv;

pub use allocator::{ArenaAllocator, NodeAllocator, NodeId};
pub use art::{Art, ArtMemoryStats, Cursor, FindResult, NodeInfo, RootId, RootNode};
pub use error::{Error, Result};
pub use kv::{KeyValueDb, Transaction};

// =============================================================================
// Configuration
// =============================================================================

/// Engine tuning shared by [`Art`] and [`KeyValueDb`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of user counters carried by every root.
    pub ulong_count: usize,
    /// Node slots reserved up front by the arena.
    pub initial_node_capacity: usize,
    /// Upper bound on live node bytes; `None` for unbounded.
    pub memory_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ulong_count: 8,
            initial_node_capacity: 1024,
            memory_limit: None,
        }
    }
}

#[cfg(test)]
mod proptests;
