use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::core::error::AppResult;
use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create the connection pool for the users/authorization database.
///
/// Runs the accounts schema migrations on a dedicated connection before
/// the pool is built, so every pooled connection sees a finished schema.
pub fn create_users_pool(database_path: &str) -> AppResult<DbPool> {
    let mut conn = Connection::open(database_path)?;
    migrations::run_accounts_migrations(&mut conn)?;
    drop(conn);

    build_pool(database_path)
}

/// Create the connection pool for the audio cache database.
pub fn create_audio_pool(database_path: &str) -> AppResult<DbPool> {
    let mut conn = Connection::open(database_path)?;
    migrations::run_audio_migrations(&mut conn)?;
    drop(conn);

    build_pool(database_path)
}

fn build_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON"));
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;
    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}
