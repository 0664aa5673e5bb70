//! Change capture and save lifecycle coordination for Revtrail.
//!
//! A [`LifecycleCoordinator`] wraps the commit of a [`TrackedStore`]:
//!
//! - [`EntryCapturer`] turns pending mutations into change entries, applying
//!   the merged per-type settings;
//! - [`EventAssembler`] maps those entries to target records and builds the
//!   audit event, back-filling store-assigned keys after the commit;
//! - the event is handed to a [`DataProvider`] once, or twice under an
//!   early-emitting policy.

mod assembler;
mod cancel;
mod capture;
mod config;
mod coordinator;
mod error;
mod sink;
mod snapshot;
mod state;
mod store;

pub use assembler::EventAssembler;
pub use cancel::{CancelPoint, SaveCancellation};
pub use capture::{CapturedEntry, EntryCapturer};
pub use config::{AuditConfiguration, AuditConfigurationBuilder};
pub use coordinator::LifecycleCoordinator;
pub use error::AuditError;
pub use sink::{DataProvider, NullProvider};
pub use snapshot::{FieldState, MutationKind, PendingMutation};
pub use state::LifecycleState;
pub use store::{AuditStore, AuditStoreFactory, CommitOutcome, StoreInfo, StoreLease, TrackedStore};

pub use revtrail_config::{AuditOptions, EventCreationPolicy};
pub use revtrail_mapping::BoxError;
