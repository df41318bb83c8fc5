//! Tracks leader-side commits awaiting quorum.
//!
//! The simplest completion primitive this crate's dependency stack
//! affords is a `mpsc` channel with a single send. `commit_data` itself
//! never blocks; the handle it returns is what the caller blocks on (or
//! polls) later.

use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::error::RaftError;

pub type CommitResult = Result<(), RaftError>;

/// Returned by `commit_data`. Resolves exactly once, either when a
/// majority has acknowledged the entry or when the commit is abandoned.
pub struct CommitHandle {
    rx: Receiver<CommitResult>,
}

impl CommitHandle {
    /// Blocks the caller until the commit resolves.
    pub fn wait(self) -> CommitResult {
        self.rx.recv().unwrap_or(Err(RaftError::Abandoned { index: 0 }))
    }

    /// Non-blocking poll; `None` if the commit is still in flight.
    pub fn try_wait(&self) -> Option<CommitResult> {
        self.rx.try_recv().ok()
    }
}

struct PendingCommit {
    tx: Sender<CommitResult>,
    callback: Option<Box<dyn FnOnce(CommitResult) + Send>>,
}

impl PendingCommit {
    fn resolve(self, result: CommitResult) {
        if let Some(callback) = self.callback {
            callback(result.clone());
        }
        let _ = self.tx.send(result);
    }
}

/// Contract: at most one pending entry per index; resolution happens
/// exactly once, in index order when multiple entries resolve together.
#[derive(Default)]
pub struct PendingCommits {
    inner: Mutex<BTreeMap<u64, PendingCommit>>,
}

impl PendingCommits {
    pub fn new() -> Self {
        PendingCommits::default()
    }

    /// Registers a new pending commit at `index`. `callback`, if given,
    /// runs on whichever thread resolves the commit (the `Driver` thread),
    /// before the handle's channel is signalled.
    pub fn register(
        &self,
        index: u64,
        callback: Option<Box<dyn FnOnce(CommitResult) + Send>>,
    ) -> CommitHandle {
        let (tx, rx) = channel();
        let mut guard = self.inner.lock().unwrap();
        guard.insert(index, PendingCommit { tx, callback });
        CommitHandle { rx }
    }

    /// Resolves every pending commit with `index <= n` as successful, in
    /// index order, removing them from the map.
    pub fn resolve_through(&self, n: u64) {
        let mut guard = self.inner.lock().unwrap();
        let ready: Vec<u64> = guard.range(..=n).map(|(i, _)| *i).collect();
        for index in ready {
            if let Some(commit) = guard.remove(&index) {
                commit.resolve(Ok(()));
            }
        }
    }

    /// Abandons every pending commit with a failure, in index order. Used
    /// when the node loses leadership or shuts down.
    pub fn abandon_all(&self) {
        let mut guard = self.inner.lock().unwrap();
        let indices: Vec<u64> = guard.keys().copied().collect();
        for index in indices {
            if let Some(commit) = guard.remove(&index) {
                commit.resolve(Err(RaftError::Abandoned { index }));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_through_majority_in_index_order() {
        let commits = PendingCommits::new();
        let h1 = commits.register(1, None);
        let h2 = commits.register(2, None);
        let h3 = commits.register(3, None);

        commits.resolve_through(2);

        assert!(h1.wait().is_ok());
        assert!(h2.wait().is_ok());
        assert_eq!(commits.len(), 1);
        drop(h3);
    }

    #[test]
    fn abandon_all_fails_every_pending_commit() {
        let commits = PendingCommits::new();
        let h1 = commits.register(1, None);
        let h2 = commits.register(2, None);

        commits.abandon_all();

        assert!(matches!(h1.wait(), Err(RaftError::Abandoned { index: 1 })));
        assert!(matches!(h2.wait(), Err(RaftError::Abandoned { index: 2 })));
        assert!(commits.is_empty());
    }

    #[test]
    fn callback_runs_before_handle_resolves() {
        let commits = PendingCommits::new();
        let observed = std::sync::Arc::new(std::sync::Mutex::new(false));
        let observed2 = observed.clone();
        let handle = commits.register(
            1,
            Some(Box::new(move |_| {
                *observed2.lock().unwrap() = true;
            })),
        );
        commits.resolve_through(1);
        assert!(handle.wait().is_ok());
        assert!(*observed.lock().unwrap());
    }

    #[test]
    fn at_most_one_pending_entry_per_index() {
        let commits = PendingCommits::new();
        let _h1 = commits.register(1, None);
        // Re-registering the same index replaces the prior entry -- the
        // contract is "at most one", not "first wins".
        let h1b = commits.register(1, None);
        commits.resolve_through(1);
        assert!(h1b.wait().is_ok());
    }
}
