//! Context database module - SQLite-backed storage for sessions, context slots, turns and cursors
pub mod context_store;
pub mod migration;
pub mod schema;

pub use context_store::SqliteContextStore;
pub use migration::MigrationManager;
pub use schema::*;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// File name used inside the configured database directory.
pub const DATABASE_FILE: &str = "context.db";

fn configure(manager: SqliteConnectionManager) -> SqliteConnectionManager {
    manager.with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))
    })
}

/// Open (or create) the database file, switch it to WAL and bring the schema up to date.
pub fn open_pool(db_path: &Path) -> anyhow::Result<SqlitePool> {
    info!("Opening context database at: {}", db_path.display());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = configure(SqliteConnectionManager::file(db_path));
    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

    {
        let mut conn = pool.get()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        info!("Context database journal mode: {}", mode);
        MigrationManager::new(&mut conn).initialize_database()?;
    }
    Ok(pool)
}

/// A private in-memory database. Every SQLite in-memory connection is its own database, so the
/// pool holds exactly one connection that is never recycled.
pub fn open_in_memory_pool() -> anyhow::Result<SqlitePool> {
    let manager = configure(SqliteConnectionManager::memory());
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;
    {
        let mut conn = pool.get()?;
        MigrationManager::new(&mut conn).initialize_database()?;
    }
    Ok(pool)
}
