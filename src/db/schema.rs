/// Schema for the offline database.
pub const SCHEMA: &str = r#"
-- Keyed records for the durable collections (pendingRequests, scheduledNotifications)
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data BLOB NOT NULL,
    UNIQUE (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, seq);

-- Artifact cache versions; exactly one is current per running context
CREATE TABLE IF NOT EXISTS cache_versions (
    version TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses, keyed by request identity within a version
CREATE TABLE IF NOT EXISTS cache_entries (
    version TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (version, request_key),
    FOREIGN KEY (version) REFERENCES cache_versions(version) ON DELETE CASCADE
);

-- Deferred wake registrations recorded for a later `wake --pending`
CREATE TABLE IF NOT EXISTS wake_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
