//! Scripted tracked stores and audit stores.

use async_trait::async_trait;
use parking_lot::Mutex;
use revtrail_capture::{
    AuditStore, AuditStoreFactory, BoxError, CommitOutcome, PendingMutation, StoreInfo,
    TrackedStore,
};
use revtrail_types::{AuditEvent, AuditRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, ordered log of what the fakes did.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Error returned by a store scripted to fail its commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreFailure {
    pub message: String,
}

/// A tracked store whose pending mutations and commit result are scripted.
pub struct ScriptedStore {
    info: StoreInfo,
    pending: Vec<PendingMutation>,
    outcome: Result<CommitOutcome, StoreFailure>,
    commit_delay: Option<Duration>,
    commits: AtomicUsize,
    journal: Option<Journal>,
}

impl ScriptedStore {
    /// A store that commits successfully, reporting one row per mutation.
    pub fn new(info: StoreInfo) -> Self {
        Self {
            info,
            pending: Vec::new(),
            outcome: Ok(CommitOutcome::default()),
            commit_delay: None,
            commits: AtomicUsize::new(0),
            journal: None,
        }
    }

    pub fn with_mutation(mut self, mutation: PendingMutation) -> Self {
        self.pending.push(mutation);
        self
    }

    /// Report this outcome instead of the default one.
    pub fn with_outcome(mut self, outcome: CommitOutcome) -> Self {
        self.outcome = Ok(outcome);
        self
    }

    /// Fail the commit with a [`StoreFailure`].
    pub fn failing_commit(mut self, message: impl Into<String>) -> Self {
        self.outcome = Err(StoreFailure {
            message: message.into(),
        });
        self
    }

    /// Sleep before asynchronous commits.
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// How many commits ran.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Mutations not yet committed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl TrackedStore for ScriptedStore {
    fn info(&self) -> StoreInfo {
        self.info.clone()
    }

    fn pending(&self) -> Vec<PendingMutation> {
        self.pending.clone()
    }

    fn commit(&mut self) -> Result<CommitOutcome, BoxError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.push("commit");
        }

        let mut outcome = self.outcome.clone()?;
        if outcome.rows_affected == 0 {
            outcome.rows_affected = self.pending.len() as u64;
        }
        self.pending.clear();
        Ok(outcome)
    }

    async fn commit_async(&mut self) -> Result<CommitOutcome, BoxError> {
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        self.commit()
    }
}

/// Audit store factory counting what its stores do.
#[derive(Clone, Default)]
pub struct CountingAuditStore {
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    records: Arc<Mutex<Vec<AuditRecord>>>,
    fail: bool,
}

impl CountingAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores opened by this factory fail to persist.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Records persisted across every opened store.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

struct CountingStore {
    owner: CountingAuditStore,
}

impl AuditStore for CountingStore {
    fn persist(&mut self, records: &[AuditRecord]) -> Result<(), BoxError> {
        if self.owner.fail {
            return Err("audit store rejected records".into());
        }
        self.owner.records.lock().extend_from_slice(records);
        Ok(())
    }

    fn release(&mut self) {
        self.owner.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl AuditStoreFactory for CountingAuditStore {
    fn open(&self, _event: &AuditEvent) -> Result<Box<dyn AuditStore>, BoxError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingStore {
            owner: self.clone(),
        }))
    }
}
