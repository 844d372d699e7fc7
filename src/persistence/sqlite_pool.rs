//! Process-wide registry of pooled SQLite connections (spec §4.A).
//!
//! Every persistent store (semantic cache, degradation response cache,
//! transaction history, installation history, context memory) opens its
//! database through [`pool_for`] rather than calling `rusqlite::Connection`
//! directly, so that WAL mode, busy-timeout, and `foreign_keys` are applied
//! exactly once per path and connections are reused instead of reopened on
//! every call.

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

const DEFAULT_POOL_SIZE: usize = 5;
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<SqlitePool>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<SqlitePool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the pool for `path`, creating and registering it on first use.
pub fn pool_for(path: &Path) -> Result<Arc<SqlitePool>> {
    let canonical = path.to_path_buf();
    let mut reg = registry()
        .lock()
        .map_err(|_| Error::Internal("sqlite pool registry poisoned".into()))?;

    if let Some(pool) = reg.get(&canonical) {
        return Ok(Arc::clone(pool));
    }

    let pool = Arc::new(SqlitePool::open(&canonical, DEFAULT_POOL_SIZE)?);
    reg.insert(canonical, Arc::clone(&pool));
    Ok(pool)
}

struct PoolState {
    idle: VecDeque<Connection>,
    opened: usize,
}

/// A bounded pool of connections to a single SQLite database file.
pub struct SqlitePool {
    path: PathBuf,
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
}

impl SqlitePool {
    fn open(path: &Path, capacity: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut idle = VecDeque::with_capacity(capacity);
        idle.push_back(Self::new_connection(path)?);

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(PoolState { idle, opened: 1 }),
            available: Condvar::new(),
            capacity,
        })
    }

    fn new_connection(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Checks out a connection, blocking until one is idle or a new one can
    /// be opened under `capacity`.
    pub fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Internal("sqlite pool mutex poisoned".into()))?;

        loop {
            if let Some(conn) = state.idle.pop_front() {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }

            if state.opened < self.capacity {
                state.opened += 1;
                drop(state);
                let conn = Self::new_connection(&self.path)?;
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(self),
                });
            }

            state = self
                .available
                .wait(state)
                .map_err(|_| Error::Internal("sqlite pool condvar poisoned".into()))?;
        }
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut state) = self.state.lock() {
            state.idle.push_back(conn);
            self.available.notify_one();
        }
    }
}

/// RAII guard returned by [`SqlitePool::get`]; returns the connection to the
/// pool when dropped.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<SqlitePool>,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pool_for_same_path_returns_same_pool() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let a = pool_for(&path).unwrap();
        let b = pool_for(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn checked_out_connection_executes_and_returns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let pool = pool_for(&path).unwrap();

        {
            let conn = pool.get().unwrap();
            conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", [])
                .unwrap();
        }

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn grows_connections_up_to_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grow.db");
        let pool = pool_for(&path).unwrap();

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        drop(first);
        drop(second);
    }
}
