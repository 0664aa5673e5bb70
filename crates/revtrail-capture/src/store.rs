//! The tracked store being audited and the optional secondary audit store.

use crate::snapshot::PendingMutation;
use async_trait::async_trait;
use revtrail_mapping::BoxError;
use revtrail_types::{AuditEvent, AuditRecord, FieldMap};
use std::collections::HashMap;
use tracing::debug;

/// Identity of a tracked store, copied onto its events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreInfo {
    /// Name of the store type, substituted for `{context}`.
    pub context_name: String,
    /// Database name, substituted for `{database}`.
    pub database: Option<String>,
    /// Connection identifier.
    pub connection_id: Option<String>,
    /// Ambient transaction identifier.
    pub transaction_id: Option<String>,
}

impl StoreInfo {
    pub fn new(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// What a successful commit reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOutcome {
    /// Rows written.
    pub rows_affected: u64,
    /// Store-assigned values, keyed by position in the pending snapshot.
    pub generated_keys: HashMap<usize, FieldMap>,
}

impl CommitOutcome {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            generated_keys: HashMap::new(),
        }
    }

    /// Record a value the store assigned to the mutation at `index`.
    pub fn with_generated(
        mut self,
        index: usize,
        field: impl Into<String>,
        value: revtrail_types::FieldValue,
    ) -> Self {
        self.generated_keys
            .entry(index)
            .or_default()
            .insert(field.into(), value);
        self
    }
}

/// A transactional store whose pending mutations are audited.
#[async_trait]
pub trait TrackedStore: Send + Sync {
    /// Store identity.
    fn info(&self) -> StoreInfo;

    /// Mutations the next commit will write, in registration order.
    fn pending(&self) -> Vec<PendingMutation>;

    /// Write the pending mutations.
    fn commit(&mut self) -> Result<CommitOutcome, BoxError>;

    /// Write the pending mutations asynchronously.
    async fn commit_async(&mut self) -> Result<CommitOutcome, BoxError> {
        self.commit()
    }
}

/// Secondary store receiving accepted target records.
#[async_trait]
pub trait AuditStore: Send {
    /// Persist records.
    fn persist(&mut self, records: &[AuditRecord]) -> Result<(), BoxError>;

    /// Persist records asynchronously.
    async fn persist_async(&mut self, records: &[AuditRecord]) -> Result<(), BoxError> {
        self.persist(records)
    }

    /// Give back whatever the store holds; called exactly once.
    fn release(&mut self) {}
}

/// Opens a secondary audit store for one event.
pub trait AuditStoreFactory: Send + Sync {
    fn open(&self, event: &AuditEvent) -> Result<Box<dyn AuditStore>, BoxError>;
}

impl<F> AuditStoreFactory for F
where
    F: Fn(&AuditEvent) -> Result<Box<dyn AuditStore>, BoxError> + Send + Sync,
{
    fn open(&self, event: &AuditEvent) -> Result<Box<dyn AuditStore>, BoxError> {
        self(event)
    }
}

/// An opened audit store, released when the lease is dropped.
pub struct StoreLease {
    store: Option<Box<dyn AuditStore>>,
}

impl StoreLease {
    /// Open a store for an event.
    pub fn open(factory: &dyn AuditStoreFactory, event: &AuditEvent) -> Result<Self, BoxError> {
        let store = factory.open(event)?;
        debug!(event_type = %event.event_type, "audit store opened");
        Ok(Self { store: Some(store) })
    }

    /// Persist records through the leased store.
    pub fn persist(&mut self, records: &[AuditRecord]) -> Result<(), BoxError> {
        match self.store.as_mut() {
            Some(store) => store.persist(records),
            None => Ok(()),
        }
    }

    /// Persist records through the leased store asynchronously.
    pub async fn persist_async(&mut self, records: &[AuditRecord]) -> Result<(), BoxError> {
        match self.store.as_mut() {
            Some(store) => store.persist_async(records).await,
            None => Ok(()),
        }
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        if let Some(mut store) = self.store.take() {
            store.release();
            debug!("audit store released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        persisted: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    impl AuditStore for Counting {
        fn persist(&mut self, records: &[AuditRecord]) -> Result<(), BoxError> {
            if self.fail {
                return Err("audit table locked".into());
            }
            self.persisted.fetch_add(records.len(), Ordering::SeqCst);
            Ok(())
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn factory(
        fail: bool,
    ) -> (
        impl AuditStoreFactory,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let persisted = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let (p, r) = (persisted.clone(), released.clone());
        let factory = move |_: &AuditEvent| -> Result<Box<dyn AuditStore>, BoxError> {
            Ok(Box::new(Counting {
                persisted: p.clone(),
                released: r.clone(),
                fail,
            }))
        };
        (factory, persisted, released)
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let (factory, persisted, released) = factory(false);
        let event = AuditEvent::new("Shop:main", "Shop");
        {
            let mut lease = StoreLease::open(&factory, &event).unwrap();
            lease.persist(&[AuditRecord::new("UserAudit")]).unwrap();
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(persisted.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_releases_after_failure() {
        let (factory, _, released) = factory(true);
        let event = AuditEvent::new("Shop:main", "Shop");
        let mut lease = StoreLease::open(&factory, &event).unwrap();
        let result = lease.persist_async(&[AuditRecord::new("UserAudit")]).await;
        drop(lease);
        assert_eq!(result.unwrap_err().to_string(), "audit table locked");
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_commit_outcome_groups_generated_values() {
        let outcome = CommitOutcome::new(2)
            .with_generated(0, "Id", json!(10))
            .with_generated(0, "Version", json!(1))
            .with_generated(1, "Id", json!(11));
        assert_eq!(outcome.generated_keys[&0].len(), 2);
        assert_eq!(outcome.generated_keys[&1]["Id"], json!(11));
    }

    #[test]
    fn test_store_info_builder() {
        let info = StoreInfo::new("Shop").with_database("main").with_transaction("tx-1");
        assert_eq!(info.database.as_deref(), Some("main"));
        assert_eq!(info.transaction_id.as_deref(), Some("tx-1"));
        assert!(info.connection_id.is_none());
    }
}
