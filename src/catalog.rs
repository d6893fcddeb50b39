//! SQLite-backed entity persistence
//!
//! Entities live in a `persons` table, one row per `add`, with the feature
//! vector stored as its little-endian f64 blob. Rows are loaded back in `id`
//! order, which is insertion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use visage_core::format::{decode_features, encode_features, scan_log};
use visage_core::{Backend, BackendError, Entity, LogBackend, MemoryBackend};

use crate::config::StorageKind;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    features BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS visage_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog {path:?} was created with dim {stored}, expected {expected}")]
    DimensionMismatch {
        path: PathBuf,
        stored: usize,
        expected: usize,
    },
    #[error("invalid row {id}: {reason}")]
    InvalidRow { id: i64, reason: String },
}

pub struct SqliteBackend {
    dim: usize,
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the catalog at `path` for vectors of dimension `dim`.
    pub fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL)?;

        match stored_dim(&conn)? {
            Some(stored) if stored != dim => {
                return Err(CatalogError::DimensionMismatch {
                    path,
                    stored,
                    expected: dim,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO visage_meta (key, value) VALUES ('dim', ?1)",
                    params![dim.to_string()],
                )?;
            }
        }

        Ok(Self {
            dim,
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing catalog without creating, migrating or writing it.
    pub fn open_read_only(path: impl AsRef<Path>, dim: usize) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        if let Some(stored) = stored_dim(&conn)? {
            if stored != dim {
                return Err(CatalogError::DimensionMismatch {
                    path,
                    stored,
                    expected: dim,
                });
            }
        }

        Ok(Self {
            dim,
            conn: Mutex::new(conn),
        })
    }

    fn load_rows(&self) -> Result<Vec<Entity>, CatalogError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, features FROM persons ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            let features =
                decode_features(&blob, self.dim).map_err(|err| CatalogError::InvalidRow {
                    id,
                    reason: err.to_string(),
                })?;
            out.push(Entity { name, features });
        }
        Ok(out)
    }

    fn insert(&self, entity: &Entity) -> Result<(), CatalogError> {
        let blob = encode_features(&entity.features);
        self.conn.lock().execute(
            "INSERT INTO persons (name, features) VALUES (?1, ?2)",
            params![entity.name, blob],
        )?;
        Ok(())
    }
}

fn stored_dim(conn: &Connection) -> Result<Option<usize>, CatalogError> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM visage_meta WHERE key = 'dim'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(stored.and_then(|v| v.parse::<usize>().ok()))
}

impl Backend for SqliteBackend {
    fn load_all(&self) -> Result<Vec<Entity>, BackendError> {
        self.load_rows().map_err(BackendError::other)
    }

    fn append(&self, entity: &Entity) -> Result<(), BackendError> {
        self.insert(entity).map_err(BackendError::other)
    }
}

/// Open the backend selected by `kind`.
pub fn open_backend(kind: StorageKind, path: &Path, dim: usize) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match kind {
        StorageKind::Sqlite => Arc::new(
            SqliteBackend::open(path, dim)
                .with_context(|| format!("opening sqlite catalog {:?}", path))?,
        ),
        StorageKind::Log => Arc::new(
            LogBackend::open(path, dim).with_context(|| format!("opening entity log {:?}", path))?,
        ),
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; entities will not survive a restart");
            Arc::new(MemoryBackend::new())
        }
    };
    Ok(backend)
}

/// Summary printed by `visage-db stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub entities: usize,
    pub dim: usize,
    /// First persisted entity that would fail validation on load.
    pub invalid: Option<String>,
    /// Bytes after the last complete log record. Left in place here.
    pub torn_tail_bytes: usize,
}

/// Read a store's contents without modifying it.
///
/// Unlike [`open_backend`], a missing store is an error, a torn log tail is
/// only reported, and no SQLite schema or metadata is written.
pub fn inspect_store(kind: StorageKind, path: &Path, dim: usize) -> Result<StoreStats> {
    if kind == StorageKind::Memory {
        bail!("memory storage has nothing to inspect");
    }
    if !path.exists() {
        bail!("no store at {:?}", path);
    }

    let (entities, torn_tail_bytes) = match kind {
        StorageKind::Log => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
            let scanned =
                scan_log(&bytes, dim).with_context(|| format!("scanning entity log {:?}", path))?;
            let torn = bytes.len() - scanned.valid_len;
            (scanned.entities, torn)
        }
        _ => {
            let backend = SqliteBackend::open_read_only(path, dim)
                .with_context(|| format!("opening sqlite catalog {:?} read-only", path))?;
            (backend.load_rows()?, 0)
        }
    };

    Ok(StoreStats {
        entities: entities.len(),
        dim,
        invalid: entities
            .iter()
            .find(|e| e.validate(dim).is_err())
            .map(|e| e.name.clone()),
        torn_tail_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sqlite_roundtrip_preserves_order_and_bits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persons.db");

        let alice = Entity::new("alice", vec![1.0, -0.0, f64::MIN_POSITIVE, 0.1]);
        let bob = Entity::new("bob", vec![0.0, 1.0, -3.5, 1e300]);
        {
            let backend = SqliteBackend::open(&path, 4).unwrap();
            backend.append(&alice).unwrap();
            backend.append(&bob).unwrap();
            backend.append(&alice).unwrap();
        }

        let backend = SqliteBackend::open(&path, 4).unwrap();
        let loaded = backend.load_all().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].name, "alice");
        assert_eq!(loaded[1].name, "bob");
        assert_eq!(loaded[2].name, "alice");
        for (a, b) in loaded[1].features.iter().zip(&bob.features) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(loaded[0].features[1].to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn sqlite_rejects_dimension_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persons.db");
        SqliteBackend::open(&path, 4).unwrap();

        let err = SqliteBackend::open(&path, 8).err().unwrap();
        assert!(matches!(
            err,
            CatalogError::DimensionMismatch {
                stored: 4,
                expected: 8,
                ..
            }
        ));
    }

    #[test]
    fn sqlite_corrupt_blob_fails_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persons.db");
        let backend = SqliteBackend::open(&path, 4).unwrap();
        backend
            .conn
            .lock()
            .execute(
                "INSERT INTO persons (name, features) VALUES ('broken', ?1)",
                params![vec![0u8; 7]],
            )
            .unwrap();

        assert!(backend.load_all().is_err());
    }

    #[test]
    fn open_backend_selects_implementation() {
        let dir = tempdir().unwrap();
        for (kind, file) in [
            (StorageKind::Sqlite, "persons.db"),
            (StorageKind::Log, "persons.vlog"),
            (StorageKind::Memory, "unused"),
        ] {
            let backend = open_backend(kind, &dir.path().join(file), 2).unwrap();
            backend.append(&Entity::new("x", vec![1.0, 2.0])).unwrap();
            assert_eq!(backend.load_all().unwrap().len(), 1);
        }
    }

    #[test]
    fn inspect_log_leaves_torn_tail_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persons.vlog");
        {
            let backend = LogBackend::open(&path, 2).unwrap();
            backend.append(&Entity::new("alice", vec![1.0, 0.0])).unwrap();
            backend.append(&Entity::new("bob", vec![0.0, 1.0])).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);
        let before = std::fs::read(&path).unwrap();

        let stats = inspect_store(StorageKind::Log, &path, 2).unwrap();
        assert_eq!(stats.entities, 1);
        assert!(stats.torn_tail_bytes > 0);
        assert_eq!(stats.invalid, None);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn inspect_sqlite_does_not_create_or_write() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.db");
        assert!(inspect_store(StorageKind::Sqlite, &missing, 2).is_err());
        assert!(!missing.exists());

        let path = dir.path().join("persons.db");
        {
            let backend = SqliteBackend::open(&path, 2).unwrap();
            backend.append(&Entity::new("alice", vec![1.0, 0.0])).unwrap();
        }

        let stats = inspect_store(StorageKind::Sqlite, &path, 2).unwrap();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.dim, 2);

        // Read-only handles refuse writes.
        let read_only = SqliteBackend::open_read_only(&path, 2).unwrap();
        assert!(read_only.append(&Entity::new("bob", vec![0.0, 1.0])).is_err());
        assert!(inspect_store(StorageKind::Sqlite, &path, 3).is_err());
    }

    #[test]
    fn inspect_memory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect_store(StorageKind::Memory, &dir.path().join("x"), 2).is_err());
    }
}
