//! Orchestration of one audited save.

use crate::assembler::EventAssembler;
use crate::cancel::{CancelPoint, SaveCancellation};
use crate::capture::EntryCapturer;
use crate::config::AuditConfiguration;
use crate::error::AuditError;
use crate::sink::DataProvider;
use crate::state::LifecycleState;
use crate::store::{CommitOutcome, StoreLease, TrackedStore};
use revtrail_config::EventCreationPolicy;
use revtrail_log::spans::{emission_span, instrument_future, record_error, unit_span, Timer};
use revtrail_mapping::BoxError;
use revtrail_types::{AuditEvent, AuditRecord, EventId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn, Instrument, Span};

/// Which flavor of the store and sink methods a save calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Blocking,
    Async,
}

/// Runs capture, mapping, emission and commit for a tracked store.
///
/// One coordinator drives one save at a time; independent saves use
/// independent coordinators sharing the same [`AuditConfiguration`].
///
/// The order of a save is fixed:
///
/// 1. pending mutations are captured and mapped to target records;
/// 2. with an early-emitting policy, the started event goes to the sink;
/// 3. the store commits and store-assigned keys are back-filled;
/// 4. the completed event is emitted, replacing the started one under
///    [`EventCreationPolicy::InsertOnStartReplaceOnEnd`];
/// 5. accepted target records are written to the secondary audit store.
///
/// A failing mapping action stops the save before the commit. A failing
/// commit is recorded on the event, which is still emitted, and then
/// returned.
pub struct LifecycleCoordinator {
    config: Arc<AuditConfiguration>,
    provider: Arc<dyn DataProvider>,
    actor: Option<String>,
    custom_fields: HashMap<String, Value>,
    state: LifecycleState,
    last_event: Option<AuditEvent>,
    last_event_id: Option<EventId>,
}

impl LifecycleCoordinator {
    pub fn new(config: Arc<AuditConfiguration>, provider: Arc<dyn DataProvider>) -> Self {
        Self {
            config,
            provider,
            actor: None,
            custom_fields: HashMap::new(),
            state: LifecycleState::Idle,
            last_event: None,
            last_event_id: None,
        }
    }

    /// Set who is responsible for the changes.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn set_actor(&mut self, actor: Option<String>) {
        self.actor = actor;
    }

    /// Add a field copied onto every event.
    pub fn set_custom_field(&mut self, key: impl Into<String>, value: impl serde::Serialize) {
        if let Ok(json) = serde_json::to_value(value) {
            self.custom_fields.insert(key.into(), json);
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &AuditConfiguration {
        &self.config
    }

    /// The event assembled by the last save, if it produced one.
    pub fn last_event(&self) -> Option<&AuditEvent> {
        self.last_event.as_ref()
    }

    /// Identifier the sink returned for the last emitted event.
    pub fn last_event_id(&self) -> Option<&EventId> {
        self.last_event_id.as_ref()
    }

    /// Audit and commit the store's pending mutations, blocking.
    ///
    /// Asynchronous mapping actions are driven on the calling thread.
    pub fn save_changes(&mut self, store: &mut dyn TrackedStore) -> Result<u64, AuditError> {
        futures::executor::block_on(self.run(store, Mode::Blocking, SaveCancellation::new()))
    }

    /// Audit and commit the store's pending mutations.
    pub async fn save_changes_async(
        &mut self,
        store: &mut dyn TrackedStore,
    ) -> Result<u64, AuditError> {
        self.run(store, Mode::Async, SaveCancellation::new()).await
    }

    /// Like [`save_changes_async`](Self::save_changes_async), stopping before
    /// the commit when `cancel` is requested.
    ///
    /// The returned [`AuditError::Cancelled`] names the point where the save
    /// stopped. A request made after the commit started has no effect.
    pub async fn save_changes_cancellable(
        &mut self,
        store: &mut dyn TrackedStore,
        cancel: SaveCancellation,
    ) -> Result<u64, AuditError> {
        self.run(store, Mode::Async, cancel).await
    }

    async fn run(
        &mut self,
        store: &mut dyn TrackedStore,
        mode: Mode,
        cancel: SaveCancellation,
    ) -> Result<u64, AuditError> {
        let info = store.info();
        let policy = format!("{:?}", self.config.options().creation_policy);
        let span = unit_span(&info.context_name, &policy);

        let unit = async move {
            let result = self.run_unit(store, mode, cancel).await;
            if let Err(err) = &result {
                record_error(err);
            }
            result
        };
        instrument_future(unit, span).await
    }

    async fn run_unit(
        &mut self,
        store: &mut dyn TrackedStore,
        mode: Mode,
        cancel: SaveCancellation,
    ) -> Result<u64, AuditError> {
        self.reset();
        let config = Arc::clone(&self.config);
        let options = config.options();

        if options.audit_disabled {
            debug!("auditing disabled");
            return self.commit_unaudited(store, mode).await;
        }

        self.transition(LifecycleState::Capturing)?;
        let mutations = store.pending();
        let capturer = EntryCapturer::new(config.resolver(), options.include_entity_objects);
        let captured = revtrail_log::timed!("capture", capturer.capture(&mutations));
        if captured.is_empty() {
            debug!(pending = mutations.len(), "nothing to audit");
            return self.commit_unaudited(store, mode).await;
        }
        Span::current().record("entries", captured.len());

        let assembler = EventAssembler::new(&config);
        let mut event = assembler.begin(&store.info(), self.actor.as_deref(), &self.custom_fields);

        let sources = match assembler.map_entries(&mut event, captured).await {
            Ok(sources) => sources,
            Err(err) => {
                self.transition(LifecycleState::Faulted)?;
                assembler.fail(&mut event, err.to_string());
                if let Err(sink) = self.insert(&event, mode, None).await {
                    warn!(error = %sink, "failed event not emitted");
                }
                self.finish(event)?;
                return Err(err.into());
            }
        };
        self.transition(LifecycleState::Mapped)?;

        let policy = options.creation_policy;
        let mut early_id = None;
        if policy.emits_early() {
            if cancel.is_requested() {
                return self
                    .abort_cancelled(event, None, CancelPoint::BeforeEmission, mode)
                    .await;
            }
            match self.insert(&event, mode, Some(&cancel)).await {
                Ok(id) => {
                    self.last_event_id = Some(id.clone());
                    early_id = Some(id);
                    self.transition(LifecycleState::EarlyEmitted)?;
                }
                Err(err) => {
                    self.transition(LifecycleState::Faulted)?;
                    self.finish(event)?;
                    return Err(err);
                }
            }
        }

        if cancel.is_requested() {
            return self
                .abort_cancelled(event, early_id, CancelPoint::BeforeCommit, mode)
                .await;
        }

        self.transition(LifecycleState::Committing)?;
        let (rows, commit_error) = match self.commit(store, mode).await {
            Ok(outcome) => {
                assembler.complete(&mut event, &sources, &mutations, &outcome);
                self.transition(LifecycleState::Finalizing)?;
                (outcome.rows_affected, None)
            }
            Err(err) => {
                assembler.fail(&mut event, err.to_string());
                self.transition(LifecycleState::Faulted)?;
                (0, Some(err))
            }
        };

        // The commit has run; from here on nothing is cancelled.
        let emitted = match early_id {
            Some(id) if policy == EventCreationPolicy::InsertOnStartReplaceOnEnd => {
                self.replace(&id, &event, mode).await.map(|()| id)
            }
            _ => self.insert(&event, mode, None).await,
        };
        if let Ok(id) = &emitted {
            self.last_event_id = Some(id.clone());
        }

        if let Some(err) = commit_error {
            if let Err(sink) = &emitted {
                warn!(error = %sink, "event for failed commit not emitted");
            }
            self.finish(event)?;
            return Err(AuditError::Commit(err));
        }

        let persisted = match emitted {
            Ok(_) => self.persist_records(&event, mode).await,
            Err(err) => Err(err),
        };
        if let Err(err) = persisted {
            self.transition(LifecycleState::Faulted)?;
            self.finish(event)?;
            return Err(err);
        }

        debug!(rows, "unit audited");
        self.finish(event)?;
        Ok(rows)
    }

    async fn commit_unaudited(
        &mut self,
        store: &mut dyn TrackedStore,
        mode: Mode,
    ) -> Result<u64, AuditError> {
        self.transition(LifecycleState::Committing)?;
        let result = self.commit(store, mode).await;
        self.transition(LifecycleState::Closed)?;
        result
            .map(|outcome| outcome.rows_affected)
            .map_err(AuditError::Commit)
    }

    async fn abort_cancelled(
        &mut self,
        mut event: AuditEvent,
        early_id: Option<EventId>,
        point: CancelPoint,
        mode: Mode,
    ) -> Result<u64, AuditError> {
        debug!(%point, early_emitted = early_id.is_some(), "save cancelled");
        self.transition(LifecycleState::Faulted)?;
        event.fail(AuditError::Cancelled(point).to_string());
        event.end();

        if let Some(id) = early_id {
            let policy = self.config.options().creation_policy;
            let result = match policy {
                EventCreationPolicy::InsertOnStartReplaceOnEnd => {
                    self.replace(&id, &event, mode).await
                }
                _ => self.insert(&event, mode, None).await.map(|_| ()),
            };
            if let Err(err) = result {
                warn!(error = %err, "cancelled event not emitted");
            }
        }

        self.finish(event)?;
        Err(AuditError::Cancelled(point))
    }

    async fn commit(
        &self,
        store: &mut dyn TrackedStore,
        mode: Mode,
    ) -> Result<CommitOutcome, BoxError> {
        let timer = Timer::start("commit");
        let result = match mode {
            Mode::Blocking => store.commit(),
            Mode::Async => store.commit_async().await,
        };
        timer.finish();
        result
    }

    async fn insert(
        &self,
        event: &AuditEvent,
        mode: Mode,
        cancel: Option<&SaveCancellation>,
    ) -> Result<EventId, AuditError> {
        let span = emission_span("insert", &event.event_type);
        match mode {
            Mode::Blocking => span
                .in_scope(|| self.provider.insert_event(event))
                .map_err(AuditError::Sink),
            Mode::Async => {
                let call = self.provider.insert_event_async(event).instrument(span);
                match cancel {
                    Some(cancel) => tokio::select! {
                        biased;
                        _ = cancel.requested() => {
                            Err(AuditError::Cancelled(CancelPoint::DuringEmission))
                        }
                        result = call => result.map_err(AuditError::Sink),
                    },
                    None => call.await.map_err(AuditError::Sink),
                }
            }
        }
    }

    async fn replace(
        &self,
        id: &EventId,
        event: &AuditEvent,
        mode: Mode,
    ) -> Result<(), AuditError> {
        let span = emission_span("replace", &event.event_type);
        let result = match mode {
            Mode::Blocking => span.in_scope(|| self.provider.replace_event(id, event)),
            Mode::Async => {
                self.provider
                    .replace_event_async(id, event)
                    .instrument(span)
                    .await
            }
        };
        result.map_err(AuditError::Sink)
    }

    async fn persist_records(&self, event: &AuditEvent, mode: Mode) -> Result<(), AuditError> {
        let Some(factory) = self.config.audit_store_factory() else {
            return Ok(());
        };
        let records: Vec<AuditRecord> = event.accepted_records().cloned().collect();
        if records.is_empty() {
            return Ok(());
        }

        let mut lease = StoreLease::open(factory.as_ref(), event).map_err(AuditError::AuditStore)?;
        let result = match mode {
            Mode::Blocking => lease.persist(&records),
            Mode::Async => lease.persist_async(&records).await,
        };
        result.map_err(AuditError::AuditStore)
    }

    fn reset(&mut self) {
        if !matches!(self.state, LifecycleState::Idle | LifecycleState::Closed) {
            warn!(state = %self.state, "previous save was abandoned");
        }
        self.state = LifecycleState::Idle;
        self.last_event = None;
        self.last_event_id = None;
    }

    fn transition(&mut self, next: LifecycleState) -> Result<(), AuditError> {
        if !self.state.can_transition_to(next) {
            return Err(AuditError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
        Ok(())
    }

    fn finish(&mut self, event: AuditEvent) -> Result<(), AuditError> {
        self.last_event = Some(event);
        self.transition(LifecycleState::Closed)
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("state", &self.state)
            .field("actor", &self.actor)
            .field("last_event_id", &self.last_event_id)
            .finish_non_exhaustive()
    }
}
