//! # membridge-core: Distributed Sync Core for Membridge
//!
//! Synchronizes a per-project embedded SQLite database across a small fleet
//! of machines via an S3-compatible object store. The parts that carry the
//! correctness arguments live here:
//!
//! - the push/pull state machines around the object store, including
//!   snapshot creation, content-hash comparison, integrity verification,
//!   atomic local replacement, and safety backups;
//! - the content-addressed lock discipline that prevents concurrent pushes;
//! - the primary/secondary leadership lease that encodes single-writer
//!   semantics and gates destructive operations.
//!
//! ## Key Modules
//!
//! - [`sync`]: the [`sync::SyncEngine`] push/pull state machines
//! - [`remote`]: typed object-store adapter and key layout
//! - [`locks`] / [`leadership`]: the write lock and the leadership lease
//! - [`snapshot`]: the local database adapter
//! - [`worker`]: worker daemon control behind a narrow capability
//!
//! ## Example
//!
//! ```no_run
//! use membridge_core::config::SyncConfig;
//! use membridge_core::remote::S3ObjectStore;
//! use membridge_core::sync::SyncEngine;
//! use membridge_core::worker::{ProcessWorker, WorkerConfig};
//!
//! async fn example() -> membridge_core::Result<()> {
//!     let cfg = SyncConfig::from_env()?;
//!     let store = S3ObjectStore::new(&cfg.store);
//!     let worker = ProcessWorker::new(cfg.worker.clone());
//!     let engine = SyncEngine::new(store, worker, cfg);
//!     let outcome = engine.push().await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

/// Safety backups taken before destructive pulls.
pub mod backup;

/// Sync engine configuration from the environment.
pub mod config;

/// Error types and Result alias for core operations.
pub mod error;

/// Canonical project identity.
pub mod identity;

/// Leadership lease and role determination.
pub mod leadership;

/// Single-writer advisory lock.
pub mod locks;

/// Agent-local persistent project registry.
pub mod registry;

/// Object-store adapter and key layout.
pub mod remote;

/// Local snapshot database adapter.
pub mod snapshot;

/// Push/pull state machines and diagnostics.
pub mod sync;

/// Worker daemon control.
pub mod worker;

// Re-export core types
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use identity::canonical_project_id;
pub use sync::{PullOutcome, PushOutcome, SyncEngine};
