//! Error types for the ART engine and the key-value layer on top of it.
//!
//! Lookups that simply do not find a key are not errors; they surface as
//! `bool` or [`FindResult`](crate::FindResult). Broken tree invariants are
//! bugs and panic. Everything here is misuse a caller can recover from.

use thiserror::Error;

/// Errors returned at the public edges of the crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The allocator's configured memory limit would be exceeded.
    #[error("out of memory: requested {requested} bytes with {allocated} of {limit} bytes in use")]
    OutOfMemory {
        requested: usize,
        allocated: usize,
        limit: usize,
    },

    /// A root's user counter index is outside the configured range.
    #[error("ulong index {index} out of range (root holds {count})")]
    UlongIndexOutOfRange { index: usize, count: usize },

    /// A write was attempted through a read-only transaction.
    #[error("writing in read-only transaction")]
    ReadOnlyTransaction,

    /// Another writing transaction is still open.
    #[error("another writing transaction is in progress")]
    WriterBusy,

    /// A writer committed after this transaction took its snapshot.
    #[error("another writing transaction already finished; retry on a fresh snapshot")]
    TransactionRetry,

    /// The operation needs a current key but the cursor is not positioned.
    #[error("no current key")]
    InvalidCurrentKey,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
