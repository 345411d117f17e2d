//! Durable persistence for everything that must outlive a context instance.
//!
//! This module provides:
//! - Keyed record collections (`pendingRequests`, `scheduledNotifications`)
//!   with insertion-ordered reads and single-key / single-batch writes
//! - Versioned artifact storage, evicted wholesale per version
//! - A ledger of deferred wake registrations

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{ArtifactStore, CachedArtifact, Collection, DurableStore, Persisted, WakeLedger};
