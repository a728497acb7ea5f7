//! Database module for the reconciler's last-known state.
//!
//! This module implements the SQLite-based persistence layer. The reconciler
//! itself is stateless; this store only remembers, per manifest address,
//! which remote id a resource was created under and which fields were last
//! applied, so later runs know what to read and what to destroy.
//!
//! Architectural role:
//! - Accessed through the workspace module, never by the reconciler
//! - Manages connection pooling

use crate::schema::FieldMap;
use log::{debug, error, info};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Database connection pool type
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt state for '{address}': {source}")]
    Corrupt {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What the store remembers about one managed resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    /// Manifest address, unique per workspace.
    pub address: String,
    pub kind: String,
    /// Id the transport returned on create.
    pub remote_id: String,
    /// Desired fields as last applied.
    pub fields: FieldMap,
}

/// SQLite store of [`ResourceRecord`]s keyed by address.
#[derive(Clone)]
pub struct StateStore {
    pool: Arc<DbPool>,
}

impl StateStore {
    /// Opens (creating if needed) the state database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self, StateError> {
        Self::with_manager(SqliteConnectionManager::file(db_path))
    }

    /// A store that lives only as long as the process. Pooled in-memory
    /// connections would each see their own database, hence a pool of one.
    pub fn in_memory() -> Result<Self, StateError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        Self::init(pool)
    }

    fn with_manager(manager: SqliteConnectionManager) -> Result<Self, StateError> {
        Self::init(Pool::new(manager)?)
    }

    fn init(pool: DbPool) -> Result<Self, StateError> {
        let connection = pool.get()?;
        Self::init_database(&connection).map_err(|e| {
            error!("Failed to initialize state database: {}", e);
            e
        })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Initialize the database with required tables
    fn init_database(conn: &DbConnection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS resource_state (
                address TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                remote_id TEXT NOT NULL,
                fields TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        debug!("State database initialized");
        Ok(())
    }

    fn connection(&self) -> Result<DbConnection, StateError> {
        self.pool.get().map_err(|e| {
            error!("Failed to get database connection: {}", e);
            StateError::Pool(e)
        })
    }

    /// Inserts or replaces the record for `record.address`.
    pub fn save(&self, record: &ResourceRecord) -> Result<(), StateError> {
        let conn = self.connection()?;
        let fields = serde_json::to_string(&record.fields)?;

        conn.execute(
            "INSERT INTO resource_state (address, kind, remote_id, fields)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(address) DO UPDATE SET
                kind = excluded.kind,
                remote_id = excluded.remote_id,
                fields = excluded.fields,
                updated_at = CURRENT_TIMESTAMP",
            params![record.address, record.kind, record.remote_id, fields],
        )?;

        info!(
            "Saved state for {} ({} '{}')",
            record.address, record.kind, record.remote_id
        );
        Ok(())
    }

    pub fn load(&self, address: &str) -> Result<Option<ResourceRecord>, StateError> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                "SELECT address, kind, remote_id, fields FROM resource_state WHERE address = ?1",
                params![address],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some(row) => Self::record_from_row(row).map(Some),
            None => {
                debug!("No recorded state for {}", address);
                Ok(None)
            }
        }
    }

    /// Every record, ordered by address.
    pub fn list(&self) -> Result<Vec<ResourceRecord>, StateError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT address, kind, remote_id, fields FROM resource_state ORDER BY address",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(Self::record_from_row(row?)?);
        }
        debug!("Loaded {} resource records", records.len());
        Ok(records)
    }

    /// Forgets `address`. Returns whether a record existed.
    pub fn remove(&self, address: &str) -> Result<bool, StateError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM resource_state WHERE address = ?1",
            params![address],
        )?;
        if deleted > 0 {
            info!("Removed state for {}", address);
        }
        Ok(deleted > 0)
    }

    fn record_from_row(
        (address, kind, remote_id, fields): (String, String, String, String),
    ) -> Result<ResourceRecord, StateError> {
        let fields = serde_json::from_str(&fields).map_err(|source| StateError::Corrupt {
            address: address.clone(),
            source,
        })?;
        Ok(ResourceRecord {
            address,
            kind,
            remote_id,
            fields,
        })
    }
}
