//! Event sink boundary.

use async_trait::async_trait;
use revtrail_mapping::BoxError;
use revtrail_types::{AuditEvent, EventId};

/// Receives assembled audit events.
///
/// How events are stored is entirely up to the implementation. Only the
/// synchronous methods are required; the asynchronous ones default to them.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Store a new event and return its identifier.
    fn insert_event(&self, event: &AuditEvent) -> Result<EventId, BoxError>;

    /// Overwrite a previously inserted event.
    fn replace_event(&self, id: &EventId, event: &AuditEvent) -> Result<(), BoxError>;

    async fn insert_event_async(&self, event: &AuditEvent) -> Result<EventId, BoxError> {
        self.insert_event(event)
    }

    async fn replace_event_async(&self, id: &EventId, event: &AuditEvent) -> Result<(), BoxError> {
        self.replace_event(id, event)
    }
}

/// A provider that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

impl DataProvider for NullProvider {
    fn insert_event(&self, _event: &AuditEvent) -> Result<EventId, BoxError> {
        Ok(EventId::generate())
    }

    fn replace_event(&self, _id: &EventId, _event: &AuditEvent) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_async_methods_default_to_sync() {
        let provider = NullProvider;
        let event = AuditEvent::new("Shop:main", "Shop");
        let id = provider.insert_event_async(&event).await.unwrap();
        assert!(id.as_str().starts_with("evt_"));
        provider.replace_event_async(&id, &event).await.unwrap();
    }
}
