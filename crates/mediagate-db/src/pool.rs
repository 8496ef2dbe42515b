//! Database connection pool management.
//!
//! Connection pooling for SQLite using r2d2. Every pooled connection has
//! foreign keys enabled and a busy timeout so that concurrent writers queue
//! instead of failing with `SQLITE_BUSY`.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use mediagate_common::{Error, Result};

use crate::migrations;

/// Type alias for the database connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Initialize a new database pool with the given file path.
///
/// Creates the database file when missing and runs pending migrations.
///
/// # Example
///
/// ```no_run
/// use mediagate_db::pool::init_pool;
///
/// let pool = init_pool("/var/lib/mediagate/db.sqlite").unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(CONNECTION_PRAGMAS)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
    });

    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {}", e)))?;

    migrate(&pool)?;
    Ok(pool)
}

/// Initialize an in-memory database pool for testing.
///
/// Each SQLite in-memory connection is its own database, so the pool holds a
/// single connection to keep every caller on the same schema and data.
///
/// # Example
///
/// ```
/// use mediagate_db::pool::init_memory_pool;
///
/// let pool = init_memory_pool().unwrap();
/// let conn = pool.get().unwrap();
/// ```
pub fn init_memory_pool() -> Result<DbPool> {
    let manager =
        SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create in-memory pool: {}", e)))?;

    migrate(&pool)?;
    Ok(pool)
}

fn migrate(pool: &DbPool) -> Result<()> {
    let conn = get_conn(pool)?;
    migrations::run_migrations(&conn)
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;
    Ok(())
}

/// Get a connection from the pool.
///
/// Converts the r2d2 error into the common Error type.
pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {}", e)))
}
