//! regsync - Registrar course catalog reconciliation
//!
//! Pulls terms, courses, sections, instructors, seats and evaluations from
//! the registrar's services, reconciles them against a persisted snapshot and
//! republishes per-term snapshots to a downstream cache.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`encoding`] - Day/time/status encodings shared by every stage
//! - [`models`] - Core data structures and types
//! - [`upstream`] - Registrar API client and payload shaping
//! - [`evaluation`] - Course evaluation scraping
//! - [`storage`] - Snapshot store (SQLite)
//! - [`reconcile`] - Section diffing and per-course transactional writes
//! - [`cache`] - Snapshot republishing (Redis or in-process)
//! - [`scheduler`] - Periodic seat refresh with graceful shutdown
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use regsync::config::Config;
//! use regsync::reconcile::{ReconcileOptions, Reconciler};
//! use regsync::storage::SqliteSnapshotStore;
//! use regsync::upstream::HttpUpstreamClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let token = config.require_api_token()?;
//!     let upstream = HttpUpstreamClient::new(&config.upstream, &config.pipeline, token)?;
//!     let store = SqliteSnapshotStore::new(&config.database.sqlite_path)?;
//!     let reconciler = Reconciler::new(
//!         Arc::new(upstream),
//!         Arc::new(store),
//!         ReconcileOptions::from(&config.pipeline),
//!     );
//!     let summary = reconciler.reconcile_term("1252".parse()?).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod encoding;
pub mod error;
pub mod evaluation;
pub mod models;
pub mod reconcile;
pub mod scheduler;
pub mod storage;
pub mod upstream;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::encoding::Status;
    pub use crate::error::{Error, ErrorCategory, RegsyncErrorTrait, Result};
    pub use crate::models::{Course, Evaluation, Instructor, Section, Term};
    pub use crate::reconcile::{ReconcileOptions, Reconciler, RunSummary};
    pub use crate::storage::{SnapshotStore, SqliteSnapshotStore};
    pub use crate::upstream::{HttpUpstreamClient, UpstreamClient};
}

// Direct re-exports for convenience
pub use models::{Course, Section, Term};
