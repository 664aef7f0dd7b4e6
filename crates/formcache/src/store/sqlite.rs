//! Durable storage medium backed by SQLite.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, trace};

use super::{ChangeBus, ChangeSubscription, KeyValueStore, StorageEvent, StoreEntry, StoreResult};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)";

#[derive(Debug)]
struct Shared {
    conn: Mutex<Connection>,
    bus: ChangeBus,
}

/// Key/value medium stored in a single SQLite table.
///
/// Handles opened with [`SqliteStore::open_tab`] share one connection and
/// one change feed. Separate processes opening the same file share the
/// data but not the feed.
#[derive(Debug)]
pub struct SqliteStore {
    shared: Arc<Shared>,
    source: u64,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!(path = %path.display(), "Opened SQLite draft store");
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let bus = ChangeBus::new();
        let source = bus.register();
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                bus,
            }),
            source,
        })
    }

    /// Open another handle onto the same database, as a second tab would.
    pub fn open_tab(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            source: self.shared.bus.register(),
        }
    }

    fn read(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn publish(&self, key: Option<&str>, old_value: Option<String>, new_value: Option<String>) {
        self.shared.bus.publish(
            self.source,
            StorageEvent {
                key: key.map(str::to_string),
                old_value,
                new_value,
            },
        );
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.shared.conn.lock();
        Self::read(&conn, key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let old_value = {
            let conn = self.shared.conn.lock();
            let old = Self::read(&conn, key)?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            old
        };
        trace!(key = %key, bytes = value.len(), "Stored value");
        if old_value.as_deref() != Some(value) {
            self.publish(Some(key), old_value, Some(value.to_string()));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let old_value = {
            let conn = self.shared.conn.lock();
            let old = Self::read(&conn, key)?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            old
        };
        if old_value.is_some() {
            self.publish(Some(key), old_value, None);
        }
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let removed = self.shared.conn.lock().execute("DELETE FROM kv", [])?;
        if removed > 0 {
            self.publish(None, None, None);
        }
        Ok(())
    }

    fn entries(&self) -> StoreResult<Vec<StoreEntry>> {
        let conn = self.shared.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, length(CAST(value AS BLOB)) FROM kv ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            let len: i64 = row.get(1)?;
            Ok(StoreEntry {
                key: row.get(0)?,
                len: usize::try_from(len).unwrap_or(0),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn subscribe(&self) -> Option<ChangeSubscription> {
        Some(self.shared.bus.subscribe(self.source))
    }
}
