/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! SQLite connection management using Diesel's `r2d2` pool.
//!
//! Multiple worker processes may open the same database file; concurrency is
//! coordinated through SQLite itself. Every pooled connection enables WAL
//! journaling, a busy timeout, and foreign keys on checkout, so that
//! concurrent claim transactions queue behind each other instead of failing
//! immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata::database::Database;
//!
//! let db = Database::new("./tasks.db")?;
//! let mut conn = db.pool().get()?;
//! ```

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use tracing::info;

use crate::error::StoreError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const DEFAULT_POOL_SIZE: u32 = 5;

/// Applied to every connection as it is checked out of the pool.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;",
        )
        .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// A pool of SQLite connections to the task store.
///
/// `Database` is `Clone`; each clone references the same underlying pool, so
/// it can be handed to the runners and the processor freely.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Opens (creating if necessary) the store at `db_path` and ensures the
    /// schema is current. The migrations are idempotent, so opening an
    /// existing store is safe.
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE)
    }

    /// As [`Database::new`] with an explicit pool size.
    pub fn with_pool_size(db_path: &str, max_size: u32) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<SqliteConnection>::new(db_path);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        let database = Database {
            pool,
            db_path: db_path.to_string(),
        };

        let mut conn = database.pool.get()?;
        super::migrations::run(&mut conn)?;

        info!(db_path, "Database connection pool initialized");
        Ok(database)
    }

    /// Returns a handle to the connection pool.
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// Checks out a single connection.
    pub fn conn(&self) -> Result<DbConnection, StoreError> {
        Ok(self.pool.get()?)
    }

    /// The filesystem path this store was opened from; injected into child
    /// tasks as `TASK_DB`.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Drops every table at `db_path` without opening a pool. Destroys data.
    pub fn reset(db_path: &str) -> Result<(), StoreError> {
        use diesel::Connection;

        let mut conn = SqliteConnection::establish(db_path)?;
        super::migrations::reset(&mut conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .finish()
    }
}
