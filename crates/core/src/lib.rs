//! rostersync core library.
//!
//! This crate reconciles a destination directory against a source roster:
//! configuration, the person model, attribute projection, diffing, the paced
//! apply phase, the orchestrator, vendor adapters, and alerting.

pub mod adapters;
pub mod batch_timer;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod models;
pub mod notify;
pub mod projection;
pub mod reconcile;

// Re-exports for convenience.
pub use config::AppConfig;
pub use models::{AttributeMapping, ChangeResults, ChangeSet, EventLogEntry, Person, Severity};
pub use reconcile::{reconcile, ReconcileOptions, Reconciler, SyncSetReport};
