// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use tokio_rusqlite::Connection;
use tracing::{debug, info};
use valet_core::ValetError;

use crate::migrations;

/// Maps tokio-rusqlite errors into `ValetError::Storage`.
pub fn map_tr_err(e: tokio_rusqlite::Error) -> ValetError {
    ValetError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the SQLite database behind the single-writer connection.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if needed) the database at `path` with WAL mode and
    /// runs any pending migrations.
    pub async fn open(path: &str) -> Result<Self, ValetError> {
        Self::open_with(path, true).await
    }

    /// Opens the database with an explicit WAL-mode choice.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, ValetError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ValetError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::from(e)))?;
        Self::initialize(conn, wal_mode, path).await
    }

    /// Opens an in-memory database with the full schema. For tests.
    pub async fn open_in_memory() -> Result<Self, ValetError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| map_tr_err(tokio_rusqlite::Error::from(e)))?;
        Self::initialize(conn, false, ":memory:").await
    }

    async fn initialize(conn: Connection, wal_mode: bool, path: &str) -> Result<Self, ValetError> {
        conn.call(move |conn| {
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")?;
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(|e: tokio_rusqlite::Error<ValetError>| ValetError::Storage {
                source: Box::new(e),
            })?;

        info!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The shared single-writer connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Closes the background connection thread.
    pub async fn close(self) -> Result<(), ValetError> {
        debug!("closing database");
        self.conn.close().await.map_err(map_tr_err)
    }
}
