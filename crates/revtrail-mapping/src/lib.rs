//! Mapping of change entries to target audit records.
//!
//! A [`TypeMapper`] holds an ordered list of explicit, predicate-guarded
//! rules and a per-source-type set of implicit rules. Each rule can carry an
//! action that populates the produced record and accepts or rejects it.
//! Actions are registered in one of several [`ActionShape`]s and normalized
//! into a single asynchronous [`AuditAction`] when registered.

mod action;
mod error;
mod mapper;

pub use action::{
    ActionFuture, ActionShape, AsyncFallible, AsyncFunction, AsyncProcedure, AuditAction,
    ComposedAction, SourceFunction, SyncFallible, SyncFunction, SyncProcedure,
};
pub use error::{ActionError, BoxError};
pub use mapper::{EntryPredicate, MappingPlan, TargetResolver, TypeMapper, TypeMapperBuilder};
