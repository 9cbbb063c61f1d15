//! Main store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use relink_core::IdentityStore;
use relink_types::DeviceId;

use crate::error::{Error, Result};
use crate::schema;

/// Namespace of the reconnect identifier list.
pub const IDENTITY_NAMESPACE: &str = "relink.reconnect-identifiers";

/// A namespaced value as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub namespace: String,
    pub value: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// SQLite-backed durable record store.
///
/// Every write is committed with `synchronous = FULL`, so it survives a
/// process crash as soon as the call returns.
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening identity store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Location of the database file (None when in memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    // === Records ===

    /// Read the record stored under `namespace`.
    pub fn get_record(&self, namespace: &str) -> Result<Option<StoredRecord>> {
        let conn = self.lock()?;
        read_record(&conn, namespace)
    }

    /// Replace the record stored under `namespace`.
    pub fn put_record(&self, namespace: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        write_record(&conn, namespace, value)
    }

    /// Delete the record stored under `namespace`. Returns whether it existed.
    pub fn delete_record(&self, namespace: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM records WHERE namespace = ?1", [namespace])?;
        Ok(deleted > 0)
    }

    // === Reconnect identities ===

    /// Remembered identifiers in insertion order.
    pub fn identities(&self) -> Result<Vec<DeviceId>> {
        let conn = self.lock()?;
        read_identities(&conn)
    }

    /// Remember an identifier. Returns false if it was already present.
    pub fn remember(&self, id: &DeviceId) -> Result<bool> {
        self.update_identities(|ids| {
            if ids.contains(id) {
                return false;
            }
            ids.push(id.clone());
            true
        })
    }

    /// Forget an identifier. Returns false if it was absent.
    pub fn forget(&self, id: &DeviceId) -> Result<bool> {
        self.update_identities(|ids| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        })
    }

    /// Forget every identifier. Returns how many were removed.
    pub fn clear_identities(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count = read_identities(&conn)?.len();
        conn.execute(
            "DELETE FROM records WHERE namespace = ?1",
            [IDENTITY_NAMESPACE],
        )?;
        info!("Cleared {} reconnect identities", count);
        Ok(count)
    }

    /// Read-modify-write the identifier list in one transaction. `change`
    /// returns whether it modified the list.
    fn update_identities(&self, change: impl FnOnce(&mut Vec<DeviceId>) -> bool) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut ids = read_identities(&tx)?;
        if !change(&mut ids) {
            return Ok(false);
        }

        let value = serde_json::to_string(&ids)?;
        write_record(&tx, IDENTITY_NAMESPACE, &value)?;
        tx.commit()?;

        debug!("Stored {} reconnect identities", ids.len());
        Ok(true)
    }
}

fn read_record(conn: &Connection, namespace: &str) -> Result<Option<StoredRecord>> {
    let record = conn
        .query_row(
            "SELECT namespace, value, updated_at FROM records WHERE namespace = ?1",
            [namespace],
            |row| {
                let updated_at = OffsetDateTime::from_unix_timestamp(row.get(2)?).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e))
                })?;
                Ok(StoredRecord {
                    namespace: row.get(0)?,
                    value: row.get(1)?,
                    updated_at,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn write_record(conn: &Connection, namespace: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO records (namespace, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(namespace) DO UPDATE SET value = ?2, updated_at = ?3",
        rusqlite::params![
            namespace,
            value,
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )?;
    Ok(())
}

fn read_identities(conn: &Connection) -> Result<Vec<DeviceId>> {
    let Some(record) = read_record(conn, IDENTITY_NAMESPACE)? else {
        return Ok(Vec::new());
    };
    let raw: Vec<String> = serde_json::from_str(&record.value)?;
    raw.iter()
        .map(|s| DeviceId::parse(s).map_err(Error::from))
        .collect()
}

impl IdentityStore for Store {
    fn add_identity(&self, id: &DeviceId) -> relink_core::Result<()> {
        self.remember(id)?;
        Ok(())
    }

    fn remove_identity(&self, id: &DeviceId) -> relink_core::Result<()> {
        self.forget(id)?;
        Ok(())
    }

    fn list_identities(&self) -> relink_core::Result<Vec<DeviceId>> {
        Ok(self.identities()?)
    }
}
