//! In-memory transactional key-value database on top of [`Art`].
//!
//! Every transaction works on its own root handle. Readers clone the last
//! committed root; a writer clones it too and bumps the transaction number.
//! Because the engine never mutates shared nodes, snapshots stay stable while
//! the writer modifies its private copy. Commit swaps the writer's root in as
//! the new last committed one.
//!
//! At most one writer exists at a time. A read transaction that starts
//! writing is upgraded in place as long as nothing was committed since its
//! snapshot was taken.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::art::{Art, ArtMemoryStats, Cursor, FindResult, RootId};
use crate::error::{Error, Result};
use crate::Config;

struct DbState {
    last_committed: RootId,
    writing: bool,
}

struct Shared {
    art: RwLock<Art>,
    state: Mutex<DbState>,
}

/// Handle to an in-memory database. Clones share the same data.
#[derive(Clone)]
pub struct KeyValueDb {
    shared: Arc<Shared>,
}

impl KeyValueDb {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut art = Art::with_config(config);
        let root = art.create_empty_root();
        Self {
            shared: Arc::new(Shared {
                art: RwLock::new(art),
                state: Mutex::new(DbState {
                    last_committed: root,
                    writing: false,
                }),
            }),
        }
    }

    fn open(&self, writing: bool, read_only: bool) -> Result<Transaction> {
        let mut state = self.shared.state.lock();
        if writing && state.writing {
            return Err(Error::WriterBusy);
        }
        let mut art = self.shared.art.write();
        let root = art.clone_root(state.last_committed);
        if writing {
            state.writing = true;
            let id = art.root(root).transaction_id() + 1;
            art.root_mut(root).set_transaction_id(id);
        }
        let number = art.root(root).transaction_id();
        debug!(transaction = number, writing, read_only, "transaction started");
        Ok(Transaction {
            shared: Arc::clone(&self.shared),
            root,
            cursor: art.create_cursor(root),
            cursor2: art.create_cursor(root),
            prefix: Vec::new(),
            read_only,
            writing: false,
            preapproved_writing: writing,
            finished: false,
            prefix_key_start: Some(0),
            prefix_key_count: None,
            key_index: None,
        })
    }

    /// Read transaction that upgrades itself on the first write.
    pub fn start_transaction(&self) -> Transaction {
        match self.open(false, false) {
            Ok(tr) => tr,
            Err(err) => unreachable!("read transaction cannot fail: {err}"),
        }
    }

    /// Writing transaction; fails with [`Error::WriterBusy`] while another
    /// writer is open.
    pub fn start_writing_transaction(&self) -> Result<Transaction> {
        self.open(true, false)
    }

    /// Transaction that refuses every write.
    pub fn start_read_only_transaction(&self) -> Transaction {
        match self.open(false, true) {
            Ok(tr) => tr,
            Err(err) => unreachable!("read transaction cannot fail: {err}"),
        }
    }

    /// Node statistics of the last committed version.
    pub fn memory_stats(&self) -> ArtMemoryStats {
        let state = self.shared.state.lock();
        let art = self.shared.art.read();
        art.memory_stats(state.last_committed)
    }

    /// Transaction number of the last committed version.
    pub fn last_committed_transaction_number(&self) -> u64 {
        let state = self.shared.state.lock();
        let art = self.shared.art.read();
        art.root(state.last_committed).transaction_id()
    }
}

impl Default for KeyValueDb {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of the database, optionally writable.
///
/// All key positions are relative to the current key prefix: indices count
/// only keys starting with it, and keys are returned with it stripped.
/// Dropping an uncommitted transaction rolls it back.
pub struct Transaction {
    shared: Arc<Shared>,
    root: RootId,
    cursor: Cursor,
    cursor2: Cursor,
    prefix: Vec<u8>,
    read_only: bool,
    writing: bool,
    preapproved_writing: bool,
    finished: bool,
    /// Absolute index of the first key under `prefix`, `None` when unknown or absent.
    prefix_key_start: Option<u64>,
    prefix_key_count: Option<u64>,
    /// Absolute index of the current key, when known.
    key_index: Option<u64>,
}

impl Transaction {
    // -------------------------------------------------------------------------
    // Prefix and positioning
    // -------------------------------------------------------------------------

    pub fn set_key_prefix(&mut self, prefix: &[u8]) {
        self.prefix = prefix.to_vec();
        self.prefix_key_start = if prefix.is_empty() { Some(0) } else { None };
        self.prefix_key_count = None;
        self.invalidate_current_key();
    }

    pub fn key_prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn invalidate_current_key(&mut self) {
        self.key_index = None;
        self.cursor.invalidate();
    }

    pub fn is_valid_key(&self) -> bool {
        self.cursor.is_valid()
    }

    fn calc_prefix_key_start(&mut self, art: &Art) -> Option<u64> {
        if self.prefix_key_start.is_none() {
            self.prefix_key_start = if self.cursor2.find_first(art, &self.prefix) {
                self.cursor2.calc_index(art)
            } else {
                None
            };
        }
        self.prefix_key_start
    }

    fn seek_relative(&mut self, art: &Art, index: u64) -> bool {
        let Some(start) = self.calc_prefix_key_start(art) else {
            self.invalidate_current_key();
            return false;
        };
        let absolute = start + index;
        if self.cursor.seek_index(art, absolute) && self.cursor.key_has_prefix(art, &self.prefix) {
            self.key_index = Some(absolute);
            return true;
        }
        self.invalidate_current_key();
        false
    }

    /// Moves to the key with relative `index`.
    pub fn set_key_index(&mut self, index: u64) -> bool {
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        self.seek_relative(&art, index)
    }

    pub fn find_first_key(&mut self) -> bool {
        self.set_key_index(0)
    }

    pub fn find_last_key(&mut self) -> bool {
        match self.get_key_value_count() {
            0 => {
                self.invalidate_current_key();
                false
            }
            count => self.set_key_index(count - 1),
        }
    }

    /// Steps forward; starts at the first key when unpositioned.
    pub fn find_next_key(&mut self) -> bool {
        if !self.cursor.is_valid() {
            return self.find_first_key();
        }
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        if self.cursor.move_next(&art) && self.cursor.key_has_prefix(&art, &self.prefix) {
            self.key_index = self.key_index.map(|i| i + 1);
            return true;
        }
        self.invalidate_current_key();
        false
    }

    /// Steps backward; starts at the last key when unpositioned.
    pub fn find_previous_key(&mut self) -> bool {
        if !self.cursor.is_valid() {
            return self.find_last_key();
        }
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        if self.cursor.move_previous(&art) && self.cursor.key_has_prefix(&art, &self.prefix) {
            self.key_index = self.key_index.map(|i| i - 1);
            return true;
        }
        self.invalidate_current_key();
        false
    }

    /// Looks up `prefix ++ key`, falling back to a neighbour under the prefix.
    pub fn find(&mut self, key: &[u8]) -> FindResult {
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        self.key_index = None;
        self.cursor.find_with_prefix(&art, &self.prefix, key)
    }

    // -------------------------------------------------------------------------
    // Counting
    // -------------------------------------------------------------------------

    /// Number of keys under the current prefix.
    pub fn get_key_value_count(&mut self) -> u64 {
        if let Some(count) = self.prefix_key_count {
            return count;
        }
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        let count = if self.prefix.is_empty() {
            art.key_count(self.root)
        } else {
            match self.calc_prefix_key_start(&art) {
                None => 0,
                Some(start) => {
                    self.cursor2.find_last(&art, &self.prefix);
                    self.cursor2.calc_index(&art).map_or(0, |last| last - start + 1)
                }
            }
        };
        self.prefix_key_count = Some(count);
        count
    }

    /// Relative index of the current key.
    pub fn get_key_index(&mut self) -> Option<u64> {
        let shared = Arc::clone(&self.shared);
        let art = shared.art.read();
        if self.key_index.is_none() {
            self.key_index = Some(self.cursor.calc_index(&art)?);
        }
        let start = self.calc_prefix_key_start(&art)?;
        self.key_index.map(|i| i - start)
    }

    // -------------------------------------------------------------------------
    // Reading the current key
    // -------------------------------------------------------------------------

    /// Current key without the prefix.
    pub fn get_key(&self) -> Option<Vec<u8>> {
        let mut key = self.get_key_including_prefix()?;
        key.drain(..self.prefix.len());
        Some(key)
    }

    pub fn get_key_including_prefix(&self) -> Option<Vec<u8>> {
        if !self.cursor.is_valid() {
            return None;
        }
        let art = self.shared.art.read();
        Some(self.cursor.key(&art))
    }

    pub fn get_value(&self) -> Option<Vec<u8>> {
        if !self.cursor.is_valid() {
            return None;
        }
        let art = self.shared.art.read();
        Some(self.cursor.value(&art).to_vec())
    }

    /// Key length (with prefix) and value length of the current key.
    pub fn get_storage_size_of_current_key(&self) -> Option<(usize, usize)> {
        if !self.cursor.is_valid() {
            return None;
        }
        let art = self.shared.art.read();
        Some((self.cursor.key_length(), self.cursor.value_length(&art)))
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    fn make_writable(&mut self) -> Result<()> {
        if self.writing {
            return Ok(());
        }
        if self.preapproved_writing {
            self.writing = true;
            self.preapproved_writing = false;
            return Ok(());
        }
        if self.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        if state.writing {
            return Err(Error::WriterBusy);
        }
        let mut art = shared.art.write();
        let last = state.last_committed;
        if art.root(last).transaction_id() != art.root(self.root).transaction_id() {
            return Err(Error::TransactionRetry);
        }
        state.writing = true;
        let position = self.cursor.calc_index(&art);
        let root = art.clone_root(last);
        let number = art.root(root).transaction_id() + 1;
        art.root_mut(root).set_transaction_id(number);
        art.dereference_root(self.root);
        self.root = root;
        self.cursor.set_new_root(root);
        self.cursor2.set_new_root(root);
        if let Some(index) = position {
            self.cursor.seek_index(&art, index);
        }
        self.writing = true;
        debug!(transaction = number, "transaction upgraded to writing");
        Ok(())
    }

    fn ensure_valid_key(&self) -> Result<()> {
        if self.cursor.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidCurrentKey)
        }
    }

    /// Positions-after-erase depend on keys that no longer exist.
    fn forget_positions_after_erase(&mut self, erased: u64) {
        self.invalidate_current_key();
        self.prefix_key_count = self.prefix_key_count.map(|c| c - erased);
        if !self.prefix.is_empty() {
            self.prefix_key_start = None;
        }
    }

    /// Writes `prefix ++ key`. Returns `true` if the key was created.
    pub fn create_or_update_key_value(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.make_writable()?;
        let shared = Arc::clone(&self.shared);
        let mut art = shared.art.write();
        let created = if self.prefix.is_empty() {
            self.cursor.upsert(&mut art, key, value)
        } else {
            let mut full = Vec::with_capacity(self.prefix.len() + key.len());
            full.extend_from_slice(&self.prefix);
            full.extend_from_slice(key);
            self.cursor.upsert(&mut art, &full, value)
        };
        self.key_index = None;
        if created {
            self.prefix_key_count = self.prefix_key_count.map(|c| c + 1);
        }
        Ok(created)
    }

    pub fn set_value(&mut self, value: &[u8]) -> Result<()> {
        self.ensure_valid_key()?;
        self.make_writable()?;
        let shared = Arc::clone(&self.shared);
        let mut art = shared.art.write();
        self.cursor.write_value(&mut art, value);
        Ok(())
    }

    pub fn erase_current(&mut self) -> Result<()> {
        self.ensure_valid_key()?;
        self.make_writable()?;
        let shared = Arc::clone(&self.shared);
        let mut art = shared.art.write();
        self.cursor.erase(&mut art);
        self.forget_positions_after_erase(1);
        Ok(())
    }

    /// Erases every key under the prefix. Returns the number erased.
    pub fn erase_all(&mut self) -> Result<u64> {
        self.erase_range(0, u64::MAX)
    }

    /// Erases relative indices `first..=last`, clamped to the visible keys.
    pub fn erase_range(&mut self, first: u64, last: u64) -> Result<u64> {
        let count = self.get_key_value_count();
        if count == 0 || first > last || first >= count {
            return Ok(0);
        }
        let last = last.min(count - 1);
        self.make_writable()?;
        let shared = Arc::clone(&self.shared);
        let mut art = shared.art.write();
        let Some(start) = self.calc_prefix_key_start(&art) else {
            return Ok(0);
        };
        if !self.cursor.seek_index(&art, start + first)
            || !self.cursor2.seek_index(&art, start + last)
        {
            unreachable!("key range {first}..={last} vanished under a writable snapshot");
        }
        let erased = self.cursor.erase_to(&mut art, &mut self.cursor2);
        debug!(first, last, erased, "erased key range");
        self.forget_positions_after_erase(erased);
        Ok(erased)
    }

    // -------------------------------------------------------------------------
    // Root metadata
    // -------------------------------------------------------------------------

    pub fn get_commit_ulong(&self) -> u64 {
        self.shared.art.read().root(self.root).commit_ulong()
    }

    pub fn set_commit_ulong(&mut self, value: u64) -> Result<()> {
        if self.get_commit_ulong() == value {
            return Ok(());
        }
        self.make_writable()?;
        self.shared.art.write().root_mut(self.root).set_commit_ulong(value);
        Ok(())
    }

    pub fn get_ulong(&self, index: usize) -> u64 {
        self.shared.art.read().root(self.root).ulong(index)
    }

    pub fn set_ulong(&mut self, index: usize, value: u64) -> Result<()> {
        if self.get_ulong(index) == value {
            return Ok(());
        }
        self.make_writable()?;
        self.shared.art.write().root_mut(self.root).set_ulong(index, value)
    }

    pub fn get_ulong_count(&self) -> usize {
        self.shared.art.read().root(self.root).ulong_count()
    }

    pub fn get_transaction_number(&self) -> u64 {
        self.shared.art.read().root(self.root).transaction_id()
    }

    pub fn is_writing(&self) -> bool {
        self.writing || self.preapproved_writing
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Publishes the changes of a writing transaction; a no-op for readers.
    pub fn commit(mut self) {
        self.finished = true;
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        let mut art = shared.art.write();
        if self.writing {
            let previous = std::mem::replace(&mut state.last_committed, self.root);
            art.dereference_root(previous);
            state.writing = false;
            info!(
                transaction = art.root(self.root).transaction_id(),
                keys = art.key_count(self.root),
                "transaction committed"
            );
        } else {
            if self.preapproved_writing {
                state.writing = false;
            }
            art.dereference_root(self.root);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.shared.state.lock();
        let mut art = self.shared.art.write();
        if self.writing || self.preapproved_writing {
            state.writing = false;
            debug!(transaction = art.root(self.root).transaction_id(), "transaction rolled back");
        }
        art.dereference_root(self.root);
    }
}
