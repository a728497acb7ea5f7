//! merka-reconcile - declarative reconciliation of Vault resources
//!
//! This crate converges remote resources on a declared desired state. It
//! reads what exists, plans the smallest set of changes and applies them
//! through a pluggable transport, retrying transient API failures.
//!
//! ## Architecture
//!
//! The crate is layered as follows:
//!
//! - `schema` module - field specifications, normalization and the registry
//! - `reconcile` module - pure planning plus plan execution with retry
//! - `transport` module - the trait every backend implements
//! - `vault` module - Vault mount and transit key backends
//! - `database` module - last-known state persistence (SQLite)
//! - `manifest` and `workspace` modules - manifest-level orchestration
//! - `cli` module - command-line interface used by the binary
//!
//! The reconciler depends only on `schema` and `transport`; backends and
//! persistence sit on top of it.

pub mod cli;
pub mod database;
pub mod error;
pub mod manifest;
pub mod reconcile;
pub mod schema;
pub mod transport;
pub mod vault;
pub mod workspace;

// Re-export public types for convenience
pub use database::{ResourceRecord, StateStore};
pub use error::ReconcileError;
pub use reconcile::{plan, Action, ApplyOutcome, Reconciler, ReconciliationPlan, RetryPolicy};
pub use schema::{FieldMap, FieldSpec, FieldValue, ResourceSchema, SchemaRegistry};
pub use transport::Transport;
pub use workspace::Workspace;

