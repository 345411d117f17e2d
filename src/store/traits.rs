//! Core traits and types for the durable store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  PendingRequests,
  ScheduledNotifications,
}

impl Collection {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::PendingRequests => "pendingRequests",
      Self::ScheduledNotifications => "scheduledNotifications",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Trait for records that live in a durable collection.
///
/// Implementors provide a stable string id; a `put` with an existing id
/// replaces the stored record but keeps its original position.
pub trait Persisted: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier within the collection
  fn record_id(&self) -> &str;

  /// Collection this record type is stored in
  fn collection() -> Collection;
}

/// Key-value persistence over record collections.
pub trait DurableStore: Send + Sync {
  /// Insert or replace a record.
  fn put<T: Persisted>(&self, record: &T) -> Result<()>;

  /// Get a single record by id.
  fn get<T: Persisted>(&self, id: &str) -> Result<Option<T>>;

  /// All records of a collection, in insertion order.
  fn get_all<T: Persisted>(&self) -> Result<Vec<T>>;

  /// Delete one record. Missing ids are not an error.
  fn delete<T: Persisted>(&self, id: &str) -> Result<()>;

  /// Delete several records atomically.
  fn delete_many<T: Persisted>(&self, ids: &[String]) -> Result<()>;
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
  /// Request identity (see `cache::request_key`)
  pub request_key: String,
  pub url: String,
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// Storage for versioned artifact caches.
pub trait ArtifactStore: Send + Sync {
  /// Create a version (if absent) and write all entries in one transaction.
  fn create_version(&self, version: &str, entries: &[CachedArtifact]) -> Result<()>;

  /// All stored version tags.
  fn versions(&self) -> Result<Vec<String>>;

  /// Delete a version and every entry under it. Returns false if it did not exist.
  fn delete_version(&self, version: &str) -> Result<bool>;

  /// Write one entry into an existing version.
  ///
  /// Returns false, writing nothing, when the version no longer exists.
  fn put_artifact(&self, version: &str, artifact: &CachedArtifact) -> Result<bool>;

  /// Look up an entry under a version.
  fn match_artifact(&self, version: &str, request_key: &str) -> Result<Option<CachedArtifact>>;

  /// Number of entries under a version.
  fn entry_count(&self, version: &str) -> Result<usize>;
}

/// Ledger of deferred wake registrations.
pub trait WakeLedger: Send + Sync {
  /// Record a registration. Registering the same tag twice keeps one entry.
  fn record_wake(&self, tag: &str) -> Result<()>;

  /// Remove and return every recorded tag, oldest first.
  fn drain_wakes(&self) -> Result<Vec<String>>;
}
