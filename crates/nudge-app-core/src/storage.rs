// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versioned record storage with all-or-nothing batched commits.
//!
//! Each record carries a [`Revision`] (BLAKE3 of its bytes). A
//! [`Transaction`] remembers the revision of everything it read; its commit
//! succeeds only if none of those records changed in between, and then applies
//! every buffered write or none of them. A failed commit leaves the store
//! exactly as it was, so the caller can simply run the transaction again.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Content revision of a stored record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Revision(pub [u8; 32]);

impl Revision {
    /// Revision of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Address of one record: a scope (project id) plus a record name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RecordKey {
    /// Owning scope, typically the project id.
    pub scope: String,
    /// Record name within the scope (e.g. `session`, `history`).
    pub name: &'static str,
}

impl RecordKey {
    /// Build a key.
    pub fn new(scope: impl Into<String>, name: &'static str) -> Self {
        Self {
            scope: scope.into(),
            name,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Stored bytes plus their revision.
#[derive(Clone, Debug)]
pub struct Versioned {
    /// Record bytes.
    pub bytes: Arc<[u8]>,
    /// Revision of `bytes`.
    pub revision: Revision,
}

impl Versioned {
    /// Wrap bytes, computing the revision.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let revision = Revision::of(&bytes);
        Self { bytes, revision }
    }
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record read by the transaction changed before commit.
    #[error("write conflict on {0}")]
    Conflict(RecordKey),
    /// The backend is temporarily unable to serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be encoded or decoded.
    #[error("record {key} is malformed: {source}")]
    Malformed {
        /// Offending record.
        key: RecordKey,
        /// Decoder error.
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Whether running the same transaction again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Unavailable(_) | Self::Io(_))
    }
}

/// Writes to apply together, guarded by read preconditions.
#[derive(Debug, Default)]
pub struct WriteBatch {
    /// Every key read by the transaction and the revision it saw (`None` = absent).
    pub expect: Vec<(RecordKey, Option<Revision>)>,
    /// Records to write.
    pub puts: Vec<(RecordKey, Vec<u8>)>,
}

/// Versioned key/value port used by the session service.
pub trait Storage: Send + Sync {
    /// Read one record.
    fn read(&self, key: &RecordKey) -> Result<Option<Versioned>, StorageError>;

    /// Apply `batch.puts` iff every `batch.expect` still holds. All-or-nothing.
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn read(&self, key: &RecordKey) -> Result<Option<Versioned>, StorageError> {
        (**self).read(key)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        (**self).commit(batch)
    }
}

/// Optimistic read-modify-write over a [`Storage`].
///
/// Reads see the transaction's own buffered writes.
pub struct Transaction<'s, S: ?Sized> {
    storage: &'s S,
    reads: BTreeMap<RecordKey, Option<Revision>>,
    puts: BTreeMap<RecordKey, Vec<u8>>,
}

impl<'s, S: Storage + ?Sized> Transaction<'s, S> {
    /// Begin a transaction.
    pub fn new(storage: &'s S) -> Self {
        Self {
            storage,
            reads: BTreeMap::new(),
            puts: BTreeMap::new(),
        }
    }

    /// Read and decode a record.
    pub fn get<T: DeserializeOwned>(&mut self, key: &RecordKey) -> Result<Option<T>, StorageError> {
        let decode = |bytes: &[u8]| {
            serde_json::from_slice(bytes).map_err(|source| StorageError::Malformed {
                key: key.clone(),
                source,
            })
        };
        if let Some(pending) = self.puts.get(key) {
            return decode(pending).map(Some);
        }
        let found = self.storage.read(key)?;
        self.reads
            .entry(key.clone())
            .or_insert_with(|| found.as_ref().map(|v| v.revision));
        found.map(|v| decode(&v.bytes)).transpose()
    }

    /// Encode and buffer a write.
    pub fn put<T: Serialize>(&mut self, key: &RecordKey, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Malformed {
            key: key.clone(),
            source,
        })?;
        self.puts.insert(key.clone(), bytes);
        Ok(())
    }

    /// Commit buffered writes. A transaction with no writes commits trivially.
    pub fn commit(self) -> Result<(), StorageError> {
        if self.puts.is_empty() {
            return Ok(());
        }
        self.storage.commit(WriteBatch {
            expect: self.reads.into_iter().collect(),
            puts: self.puts.into_iter().collect(),
        })
    }
}

/// In-process [`Storage`] for tests and ephemeral hubs.
///
/// `fail_next_commits(n)` makes the next `n` commits fail with
/// [`StorageError::Conflict`] without touching the data.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<RecordKey, Versioned>>,
    fail_next: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `n` consecutive commit conflicts.
    pub fn fail_next_commits(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Raw record bytes, bypassing transactions.
    pub fn raw(&self, key: &RecordKey) -> Option<Arc<[u8]>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.get(key).map(|v| Arc::clone(&v.bytes))
    }

    /// Overwrite a record outside any transaction (simulates a foreign writer).
    pub fn put_raw(&self, key: RecordKey, bytes: Vec<u8>) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(key, Versioned::new(bytes));
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &RecordKey) -> Result<Option<Versioned>, StorageError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            let key = batch
                .puts
                .first()
                .map_or_else(|| RecordKey::new("", "unknown"), |(k, _)| k.clone());
            return Err(StorageError::Conflict(key));
        }
        for (key, expected) in &batch.expect {
            let current = records.get(key).map(|v| v.revision);
            if current != *expected {
                return Err(StorageError::Conflict(key.clone()));
            }
        }
        for (key, bytes) in batch.puts {
            records.insert(key, Versioned::new(bytes));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
