//! Test utilities for Revtrail crates.

pub mod fixtures;
pub mod provider;
pub mod store;

pub use provider::{MemoryProvider, ProviderCall};
pub use store::{CountingAuditStore, Journal, ScriptedStore, StoreFailure};

use std::path::PathBuf;
use tempfile::TempDir;

/// Write an audit configuration file into a fresh temporary directory.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("revtrail.yaml");
    std::fs::write(&path, content).expect("Failed to write config file");
    (dir, path)
}

/// Assert that a Result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a Result is Err and return the error.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
            Err(e) => e,
        }
    };
}
