use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use rusqlite::Connection;

use crate::error::StoreError;
use crate::schema;

/// How long a writer blocks on `SQLITE_BUSY` before giving up. Generous
/// because contention here is between cooperating controller processes,
/// not an adversarial workload; a failed conditional update should mean
/// "the gate didn't hold", never "the engine was briefly busy".
const BUSY_TIMEOUT_MS: u32 = 30_000;

/// A guarded, migrated connection to the managed-job state database.
///
/// Every mutator and query takes a `&DbHandle` and holds the inner mutex
/// only for the duration of one statement. This is the "scoped cursor"
/// of the storage engine: callers never see the raw `Connection`.
pub struct DbHandle {
    conn: Mutex<Connection>,
}

impl DbHandle {
    /// Opens (creating if absent) the database at `path`, enables WAL
    /// mode on a best-effort basis, and runs schema creation/migration.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        set_busy_timeout(&conn)?;
        enable_wal_if_supported(&conn);
        schema::init(&conn)?;

        Ok(DbHandle {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database; used by tests that don't need
    /// cross-process durability.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        set_busy_timeout(&conn)?;
        schema::init(&conn)?;
        Ok(DbHandle {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn set_busy_timeout(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
    Ok(())
}

/// Attempts to switch the database to WAL journaling for better
/// concurrent-reader/single-writer throughput. Some platforms (e.g.
/// certain network filesystems) reject WAL; in that case we log and
/// continue in the engine's default journal mode. Correctness never
/// depends on WAL being active, only throughput under contention.
fn enable_wal_if_supported(conn: &Connection) {
    let result = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0));
    match result {
        Ok(mode) if mode.eq_ignore_ascii_case("wal") => {
            tracing::debug!("enabled WAL journal mode for managed-job store");
        }
        Ok(mode) => {
            tracing::warn!(%mode, "sqlite did not honor WAL journal mode request");
        }
        Err(err) => {
            tracing::warn!(%err, "failed to enable WAL journal mode; continuing without it");
        }
    }
}

/// The default on-disk location: `<home>/.sky/spot_jobs.db`.
fn default_db_path(home: &Path) -> PathBuf {
    home.join(".sky").join("spot_jobs.db")
}

fn resolve_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// The process-wide, lazily-initialized handle: the first caller to
/// reach this function pays for path
/// resolution, directory creation, connection open, and migration;
/// every later caller takes the fast `OnceLock::get` path and only
/// contends on the connection mutex for the statement it's about to run.
static SHARED: OnceLock<Result<DbHandle, String>> = OnceLock::new();

/// Returns the process-wide managed-job store, initializing it on first
/// use. Initialization failures are cached and re-surfaced to every
/// caller rather than retried, since a failure here (e.g. an unwritable
/// home directory) will not resolve itself within one process lifetime.
pub fn shared() -> Result<&'static DbHandle, StoreError> {
    match SHARED.get_or_init(|| DbHandle::open_at(default_db_path(&resolve_home())).map_err(|e| e.to_string()))
    {
        Ok(handle) => Ok(handle),
        Err(message) => Err(StoreError::Init(message.clone())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_path_is_under_sky_dir() {
        let home = PathBuf::from("/home/alice");
        assert_eq!(
            default_db_path(&home),
            PathBuf::from("/home/alice/.sky/spot_jobs.db")
        );
    }

    #[test]
    fn open_at_creates_parent_dirs_and_migrates() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("spot_jobs.db");
        let handle = DbHandle::open_at(&db_path).unwrap();
        assert!(db_path.exists());
        // Re-opening (simulating a second process) must be a no-op migration.
        drop(handle);
        DbHandle::open_at(&db_path).unwrap();
    }

    #[test]
    fn open_in_memory_is_usable_immediately() {
        let handle = DbHandle::open_in_memory().unwrap();
        let conn = handle.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM spot_jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
