//! The locked, atomic update primitive shared by every persistent store
//! (spec §4.A). Two forms: a flat-file read-modify-write under an advisory
//! lock, and a process-wide registry of pooled SQLite connections.

mod locked_file;
mod sqlite_pool;

pub use locked_file::locked_update;
pub use sqlite_pool::{pool_for, PooledConnection, SqlitePool};
