//! The `DataStore` interface and an in-memory implementation
//! used by tests and as a reference for hosts that don't need durability
//! across restarts. Persistence is the application's concern; this crate
//! only ever holds a shared handle to whatever implements the trait.

use std::sync::Mutex;

use crate::data::{LogEntry, Term};

/// Persistent log access, supplied by the application.
///
/// Reads for building `AppendEntries` may run concurrently with unrelated
/// commits as long as the implementation offers snapshot reads by index;
/// all mutating calls (`append`, `truncate_from`, `set_commit_index`) must
/// be serialized, which the single-threaded `Driver` (see `context`)
/// guarantees by construction for the in-process case.
pub trait DataStore: Send + Sync {
    fn last_index(&self) -> u64;
    fn last_term(&self) -> Term;
    fn entry(&self, index: u64) -> Option<LogEntry>;
    /// Appends entries, returning the new last index.
    fn append(&self, entries: &[LogEntry]) -> u64;
    /// Removes every entry with `index >= index`.
    fn truncate_from(&self, index: u64);
    fn commit_index(&self) -> u64;
    fn set_commit_index(&self, index: u64);
}

/// A plain `Vec`-backed log, guarded by a mutex. Reference implementation
/// and the default store wired up in tests.
#[derive(Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

#[derive(Default)]
struct MemoryLogInner {
    entries: Vec<LogEntry>,
    commit_index: u64,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }
}

impl DataStore for MemoryLog {
    fn last_index(&self) -> u64 {
        self.inner.lock().unwrap().entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.inner.lock().unwrap().entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn entry(&self, index: u64) -> Option<LogEntry> {
        if index == 0 {
            return None;
        }
        let guard = self.inner.lock().unwrap();
        guard
            .entries
            .get((index - 1) as usize)
            .filter(|e| e.index == index)
            .cloned()
    }

    fn append(&self, entries: &[LogEntry]) -> u64 {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.extend_from_slice(entries);
        guard.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn truncate_from(&self, index: u64) {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.retain(|e| e.index < index);
    }

    fn commit_index(&self) -> u64 {
        self.inner.lock().unwrap().commit_index
    }

    fn set_commit_index(&self, index: u64) {
        self.inner.lock().unwrap().commit_index = index;
    }
}
