//! Action shapes and their normalization into one asynchronous signature.

use crate::error::{ActionError, BoxError};
use futures::future::{self, BoxFuture};
use revtrail_types::{AuditEvent, AuditRecord, ChangeEntry, RawRecord};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Future returned by a normalized action.
pub type ActionFuture<'a> = BoxFuture<'a, Result<bool, ActionError>>;

type CanonicalFn = dyn for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> ActionFuture<'a>
    + Send
    + Sync;

/// Synchronous action that always accepts.
pub type SyncProcedure = Arc<dyn Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) + Send + Sync>;
/// Synchronous action returning its verdict.
pub type SyncFunction =
    Arc<dyn Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) -> bool + Send + Sync>;
/// Synchronous action that may fail.
pub type SyncFallible = Arc<
    dyn Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) -> Result<bool, ActionError>
        + Send
        + Sync,
>;
/// Asynchronous action that always accepts.
pub type AsyncProcedure = Arc<
    dyn for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> BoxFuture<'a, ()>
        + Send
        + Sync,
>;
/// Asynchronous action returning its verdict.
pub type AsyncFunction = Arc<
    dyn for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> BoxFuture<'a, bool>
        + Send
        + Sync,
>;
/// Asynchronous action that may fail.
pub type AsyncFallible = Arc<CanonicalFn>;
/// Action reading the originating record instead of the event.
pub type SourceFunction =
    Arc<dyn Fn(&RawRecord, &mut AuditRecord) -> Result<bool, ActionError> + Send + Sync>;

/// The callback shapes an action can be registered in.
#[derive(Clone)]
pub enum ActionShape {
    /// `(event, entry, record)`, no verdict.
    Procedure(SyncProcedure),
    /// `(event, entry, record) -> bool`.
    Function(SyncFunction),
    /// `(event, entry, record) -> Result<bool, _>`.
    Fallible(SyncFallible),
    /// Awaited `(event, entry, record)`, no verdict.
    AsyncProcedure(AsyncProcedure),
    /// Awaited `(event, entry, record) -> bool`.
    AsyncFunction(AsyncFunction),
    /// Awaited `(event, entry, record) -> Result<bool, _>`.
    AsyncFallible(AsyncFallible),
    /// `(source, record)`, needs the entry's originating record.
    Source(SourceFunction),
}

impl ActionShape {
    /// Register a synchronous procedure.
    pub fn procedure<F>(f: F) -> Self
    where
        F: Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) + Send + Sync + 'static,
    {
        Self::Procedure(Arc::new(f))
    }

    /// Register a synchronous function returning the verdict.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) -> bool + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Register a synchronous function that may fail.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: Fn(&AuditEvent, &mut ChangeEntry, &mut AuditRecord) -> Result<bool, E>
            + Send
            + Sync
            + 'static,
        E: Into<BoxError>,
    {
        Self::Fallible(Arc::new(
            move |event: &AuditEvent, entry: &mut ChangeEntry, record: &mut AuditRecord| {
                f(event, entry, record).map_err(ActionError::callback)
            },
        ))
    }

    /// Register an asynchronous procedure.
    pub fn async_procedure<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        Self::AsyncProcedure(Arc::new(f))
    }

    /// Register an asynchronous function returning the verdict.
    pub fn async_function<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> BoxFuture<'a, bool>
            + Send
            + Sync
            + 'static,
    {
        Self::AsyncFunction(Arc::new(f))
    }

    /// Register an asynchronous function that may fail.
    pub fn async_fallible<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> ActionFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        Self::AsyncFallible(Arc::new(f))
    }

    /// Register a procedure over the originating record of type `S`.
    pub fn source_procedure<S, F>(f: F) -> Self
    where
        S: Any,
        F: Fn(&S, &mut AuditRecord) + Send + Sync + 'static,
    {
        Self::source_function::<S, _>(move |source, record| {
            f(source, record);
            true
        })
    }

    /// Register a function over the originating record of type `S`.
    pub fn source_function<S, F>(f: F) -> Self
    where
        S: Any,
        F: Fn(&S, &mut AuditRecord) -> bool + Send + Sync + 'static,
    {
        Self::Source(Arc::new(move |raw: &RawRecord, record: &mut AuditRecord| {
            match raw.downcast_ref::<S>() {
                Some(source) => Ok(f(source, record)),
                None => Err(ActionError::SourceTypeMismatch {
                    record_type: record.target_type.clone(),
                    expected: type_name::<S>(),
                }),
            }
        }))
    }

    /// Whether running the action needs the entry's originating record.
    pub fn requires_raw_record(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    /// Normalize into the canonical asynchronous action.
    pub fn into_action(self) -> AuditAction {
        let requires_raw_record = self.requires_raw_record();
        let invoke = match self {
            Self::Procedure(f) => canonical(move |event, entry, record| {
                f(event, entry, record);
                Box::pin(future::ready(Ok(true)))
            }),
            Self::Function(f) => canonical(move |event, entry, record| {
                Box::pin(future::ready(Ok(f(event, entry, record))))
            }),
            Self::Fallible(f) => canonical(move |event, entry, record| {
                Box::pin(future::ready(f(event, entry, record)))
            }),
            Self::AsyncProcedure(f) => canonical(move |event, entry, record| {
                let fut = f(event, entry, record);
                Box::pin(async move {
                    fut.await;
                    Ok::<bool, ActionError>(true)
                })
            }),
            Self::AsyncFunction(f) => canonical(move |event, entry, record| {
                let fut = f(event, entry, record);
                Box::pin(async move { Ok::<bool, ActionError>(fut.await) })
            }),
            Self::AsyncFallible(f) => f,
            Self::Source(f) => canonical(move |_event, entry, record| {
                let result = match &entry.raw_record {
                    Some(raw) => f(raw, record),
                    None => Err(ActionError::MissingRawRecord {
                        record_type: entry.record_type.clone(),
                    }),
                };
                Box::pin(future::ready(result))
            }),
        };

        AuditAction {
            invoke,
            requires_raw_record,
        }
    }
}

impl fmt::Debug for ActionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Self::Procedure(_) => "Procedure",
            Self::Function(_) => "Function",
            Self::Fallible(_) => "Fallible",
            Self::AsyncProcedure(_) => "AsyncProcedure",
            Self::AsyncFunction(_) => "AsyncFunction",
            Self::AsyncFallible(_) => "AsyncFallible",
            Self::Source(_) => "Source",
        };
        f.write_str(shape)
    }
}

fn canonical<F>(f: F) -> Arc<CanonicalFn>
where
    F: for<'a> Fn(&'a AuditEvent, &'a mut ChangeEntry, &'a mut AuditRecord) -> ActionFuture<'a>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// An action normalized to `(event, entry, record) -> Future<Result<bool>>`.
#[derive(Clone)]
pub struct AuditAction {
    invoke: Arc<CanonicalFn>,
    requires_raw_record: bool,
}

impl AuditAction {
    /// Run the action against a record.
    pub fn invoke<'a>(
        &self,
        event: &'a AuditEvent,
        entry: &'a mut ChangeEntry,
        record: &'a mut AuditRecord,
    ) -> ActionFuture<'a> {
        (self.invoke)(event, entry, record)
    }

    /// Whether the action reads the originating record.
    pub fn requires_raw_record(&self) -> bool {
        self.requires_raw_record
    }
}

impl From<ActionShape> for AuditAction {
    fn from(shape: ActionShape) -> Self {
        shape.into_action()
    }
}

impl fmt::Debug for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditAction")
            .field("requires_raw_record", &self.requires_raw_record)
            .finish_non_exhaustive()
    }
}

/// The actions that apply to one produced record, run in order.
///
/// Every present action runs; the verdict is the conjunction of all of them.
/// An error from any action stops the sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposedAction<'r> {
    explicit: Option<&'r AuditAction>,
    implicit: Option<&'r AuditAction>,
    common: Option<&'r AuditAction>,
}

impl<'r> ComposedAction<'r> {
    /// Compose the explicit-rule, per-type and common actions.
    pub fn new(
        explicit: Option<&'r AuditAction>,
        implicit: Option<&'r AuditAction>,
        common: Option<&'r AuditAction>,
    ) -> Self {
        Self {
            explicit,
            implicit,
            common,
        }
    }

    /// Number of actions that will run.
    pub fn len(&self) -> usize {
        self.steps().count()
    }

    /// Whether no action is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn steps(&self) -> impl Iterator<Item = &'r AuditAction> {
        [self.explicit, self.implicit, self.common].into_iter().flatten()
    }

    /// Run every action and combine the verdicts.
    pub async fn run(
        &self,
        event: &AuditEvent,
        entry: &mut ChangeEntry,
        record: &mut AuditRecord,
    ) -> Result<bool, ActionError> {
        let mut accepted = true;
        for action in self.steps() {
            let verdict = action.invoke(event, entry, record).await?;
            accepted = accepted && verdict;
        }
        Ok(accepted)
    }
}
