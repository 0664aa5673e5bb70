//! In-memory event sink.

use crate::store::Journal;
use async_trait::async_trait;
use parking_lot::Mutex;
use revtrail_capture::{BoxError, DataProvider};
use revtrail_types::{AuditEvent, EventId};
use std::time::Duration;

/// A call received by a [`MemoryProvider`].
#[derive(Debug, Clone)]
pub enum ProviderCall {
    Insert(EventId, AuditEvent),
    Replace(EventId, AuditEvent),
}

impl ProviderCall {
    pub fn event(&self) -> &AuditEvent {
        match self {
            Self::Insert(_, event) | Self::Replace(_, event) => event,
        }
    }

    pub fn id(&self) -> &EventId {
        match self {
            Self::Insert(id, _) | Self::Replace(id, _) => id,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert(..))
    }
}

/// Sink keeping every call in memory.
#[derive(Default)]
pub struct MemoryProvider {
    calls: Mutex<Vec<ProviderCall>>,
    fail_inserts_after: Option<usize>,
    async_delay: Option<Duration>,
    journal: Option<Journal>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every insert after the first `n` succeeded.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_inserts_after = Some(n);
        self
    }

    /// Sleep before handling asynchronous calls.
    pub fn with_async_delay(mut self, delay: Duration) -> Self {
        self.async_delay = Some(delay);
        self
    }

    /// Note each call in a journal shared with other fakes.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// The latest version of each stored event, in insertion order.
    pub fn events(&self) -> Vec<AuditEvent> {
        let calls = self.calls.lock();
        let mut stored: Vec<(EventId, AuditEvent)> = Vec::new();
        for call in calls.iter() {
            match call {
                ProviderCall::Insert(id, event) => stored.push((id.clone(), event.clone())),
                ProviderCall::Replace(id, event) => {
                    if let Some(slot) = stored.iter_mut().find(|(stored_id, _)| stored_id == id) {
                        slot.1 = event.clone();
                    }
                }
            }
        }
        stored.into_iter().map(|(_, event)| event).collect()
    }

    pub fn insert_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| c.is_insert()).count()
    }

    pub fn replace_count(&self) -> usize {
        self.calls.lock().iter().filter(|c| !c.is_insert()).count()
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    fn insert_event(&self, event: &AuditEvent) -> Result<EventId, BoxError> {
        let mut calls = self.calls.lock();
        let inserted = calls.iter().filter(|c| c.is_insert()).count();
        if self.fail_inserts_after.is_some_and(|n| inserted >= n) {
            return Err("event sink unavailable".into());
        }

        let id = EventId::generate();
        calls.push(ProviderCall::Insert(id.clone(), event.clone()));
        if let Some(journal) = &self.journal {
            journal.push("insert");
        }
        Ok(id)
    }

    fn replace_event(&self, id: &EventId, event: &AuditEvent) -> Result<(), BoxError> {
        self.calls
            .lock()
            .push(ProviderCall::Replace(id.clone(), event.clone()));
        if let Some(journal) = &self.journal {
            journal.push("replace");
        }
        Ok(())
    }

    async fn insert_event_async(&self, event: &AuditEvent) -> Result<EventId, BoxError> {
        if let Some(delay) = self.async_delay {
            tokio::time::sleep(delay).await;
        }
        self.insert_event(event)
    }

    async fn replace_event_async(&self, id: &EventId, event: &AuditEvent) -> Result<(), BoxError> {
        if let Some(delay) = self.async_delay {
            tokio::time::sleep(delay).await;
        }
        self.replace_event(id, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_updates_stored_event() {
        let provider = MemoryProvider::new();
        let mut event = AuditEvent::new("Shop:main", "Shop");
        let id = provider.insert_event(&event).unwrap();
        event.success = true;
        provider.replace_event(&id, &event).unwrap();

        let events = provider.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(provider.insert_count(), 1);
        assert_eq!(provider.replace_count(), 1);
    }

    #[test]
    fn test_failing_after() {
        let provider = MemoryProvider::new().failing_after(1);
        let event = AuditEvent::new("Shop:main", "Shop");
        assert!(provider.insert_event(&event).is_ok());
        let err = provider.insert_event(&event).unwrap_err();
        assert_eq!(err.to_string(), "event sink unavailable");
    }
}
