//! SQLite implementation of the durable store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{ArtifactStore, CachedArtifact, DurableStore, Persisted, WakeLedger};
use crate::db::Database;

/// SQLite-based durable store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    let db = Database::open(path)?;
    Ok(Self {
      conn: Mutex::new(db.into_conn()),
    })
  }

  /// Open a private in-memory store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let db = Database::open_in_memory()?;
    Ok(Self {
      conn: Mutex::new(db.into_conn()),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl DurableStore for SqliteStore {
  fn put<T: Persisted>(&self, record: &T) -> Result<()> {
    let conn = self.conn()?;
    let collection = T::collection();
    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    conn
      .execute(
        "INSERT INTO records (collection, id, data) VALUES (?1, ?2, ?3)
         ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data",
        params![collection.as_str(), record.record_id(), data],
      )
      .map_err(|e| eyre!("Failed to store record in {}: {}", collection, e))?;

    Ok(())
  }

  fn get<T: Persisted>(&self, id: &str) -> Result<Option<T>> {
    let conn = self.conn()?;
    let collection = T::collection();

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
        params![collection.as_str(), id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read record {} from {}: {}", id, collection, e))?;

    data
      .map(|data| {
        serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize record {} from {}: {}", id, collection, e))
      })
      .transpose()
  }

  fn get_all<T: Persisted>(&self) -> Result<Vec<T>> {
    let conn = self.conn()?;
    let collection = T::collection();

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE collection = ?1 ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Vec<u8>> = stmt
      .query_map(params![collection.as_str()], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {}: {}", collection, e))?;

    rows
      .iter()
      .map(|data| {
        serde_json::from_slice(data)
          .map_err(|e| eyre!("Failed to deserialize record from {}: {}", collection, e))
      })
      .collect()
  }

  fn delete<T: Persisted>(&self, id: &str) -> Result<()> {
    let conn = self.conn()?;
    let collection = T::collection();

    conn
      .execute(
        "DELETE FROM records WHERE collection = ?1 AND id = ?2",
        params![collection.as_str(), id],
      )
      .map_err(|e| eyre!("Failed to delete record {} from {}: {}", id, collection, e))?;

    Ok(())
  }

  fn delete_many<T: Persisted>(&self, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }

    let mut conn = self.conn()?;
    let collection = T::collection();

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    {
      let mut stmt = tx
        .prepare("DELETE FROM records WHERE collection = ?1 AND id = ?2")
        .map_err(|e| eyre!("Failed to prepare delete: {}", e))?;
      for id in ids {
        stmt
          .execute(params![collection.as_str(), id])
          .map_err(|e| eyre!("Failed to delete record {} from {}: {}", id, collection, e))?;
      }
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

impl ArtifactStore for SqliteStore {
  fn create_version(&self, version: &str, entries: &[CachedArtifact]) -> Result<()> {
    let mut conn = self.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_versions (version) VALUES (?1)",
      params![version],
    )
    .map_err(|e| eyre!("Failed to create cache version {}: {}", version, e))?;

    for entry in entries {
      insert_artifact(&tx, version, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn versions(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT version FROM cache_versions ORDER BY created_at, version")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let versions = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache versions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache versions: {}", e))?;

    Ok(versions)
  }

  fn delete_version(&self, version: &str) -> Result<bool> {
    let mut conn = self.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE version = ?1",
      params![version],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", version, e))?;

    let removed = tx
      .execute(
        "DELETE FROM cache_versions WHERE version = ?1",
        params![version],
      )
      .map_err(|e| eyre!("Failed to delete cache version {}: {}", version, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put_artifact(&self, version: &str, artifact: &CachedArtifact) -> Result<bool> {
    let conn = self.conn()?;
    insert_artifact(&conn, version, artifact)
  }

  fn match_artifact(&self, version: &str, request_key: &str) -> Result<Option<CachedArtifact>> {
    let conn = self.conn()?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE version = ?1 AND request_key = ?2",
        params![version, request_key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers for {}: {}", url, e))?;
        Ok(Some(CachedArtifact {
          request_key: request_key.to_string(),
          url,
          status,
          headers,
          body,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn entry_count(&self, version: &str) -> Result<usize> {
    let conn = self.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE version = ?1",
        params![version],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", version, e))?;

    Ok(count as usize)
  }
}

impl WakeLedger for SqliteStore {
  fn record_wake(&self, tag: &str) -> Result<()> {
    let conn = self.conn()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO wake_registrations (tag) VALUES (?1)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to record wake registration {}: {}", tag, e))?;

    Ok(())
  }

  fn drain_wakes(&self) -> Result<Vec<String>> {
    let mut conn = self.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let tags = {
      let mut stmt = tx
        .prepare("SELECT tag FROM wake_registrations ORDER BY registered_at, rowid")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let tags = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list wake registrations: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read wake registrations: {}", e))?;
      tags
    };

    tx.execute("DELETE FROM wake_registrations", [])
      .map_err(|e| eyre!("Failed to clear wake registrations: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(tags)
  }
}

/// Insert an entry, guarded on the version still existing.
fn insert_artifact(conn: &Connection, version: &str, artifact: &CachedArtifact) -> Result<bool> {
  let headers = serde_json::to_string(&artifact.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  let written = conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (version, request_key, url, status, headers, body, cached_at)
       SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
       WHERE EXISTS (SELECT 1 FROM cache_versions WHERE version = ?1)",
      params![
        version,
        artifact.request_key,
        artifact.url,
        artifact.status,
        headers,
        artifact.body,
        artifact.cached_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", artifact.url, e))?;

  Ok(written > 0)
}

/// Parse an RFC 3339 timestamp written by `insert_artifact`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
