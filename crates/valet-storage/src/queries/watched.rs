// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Monitored external resources for the web-change watcher.

use rusqlite::params;
use valet_core::ValetError;

use crate::database::{map_tr_err, Database};
use crate::models::WatchedResource;
use crate::now_iso;

fn row_to_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<WatchedResource> {
    Ok(WatchedResource {
        id: row.get(0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        last_hash: row.get(3)?,
        last_checked_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Start watching a URL for a user. Re-adding an existing URL is a no-op.
pub async fn add_watch(db: &Database, user_id: &str, url: &str) -> Result<(), ValetError> {
    let user_id = user_id.to_string();
    let url = url.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO watched_resources (user_id, url) VALUES (?1, ?2)
                 ON CONFLICT(user_id, url) DO NOTHING",
                params![user_id, url],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// All watched resources for a user.
pub async fn list_watches(db: &Database, user_id: &str) -> Result<Vec<WatchedResource>, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, url, last_hash, last_checked_at, created_at
                 FROM watched_resources WHERE user_id = ?1 ORDER BY id",
            )?;
            let resources = stmt
                .query_map(params![user_id], row_to_resource)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(resources)
        })
        .await
        .map_err(map_tr_err)
}

/// Record the latest content hash after a check.
pub async fn record_check(db: &Database, id: i64, hash: &str) -> Result<(), ValetError> {
    let hash = hash.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE watched_resources SET last_hash = ?1, last_checked_at = ?2 WHERE id = ?3",
                params![hash, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Stop watching a URL. Returns whether a row was removed.
pub async fn remove_watch(db: &Database, user_id: &str, url: &str) -> Result<bool, ValetError> {
    let user_id = user_id.to_string();
    let url = url.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM watched_resources WHERE user_id = ?1 AND url = ?2",
                params![user_id, url],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        add_watch(&db, "u1", "https://example.com/changelog").await.unwrap();
        add_watch(&db, "u1", "https://example.com/changelog").await.unwrap();
        assert_eq!(list_watches(&db, "u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_check_updates_hash() {
        let db = Database::open_in_memory().await.unwrap();
        add_watch(&db, "u1", "https://example.com").await.unwrap();
        let watch = &list_watches(&db, "u1").await.unwrap()[0];
        assert!(watch.last_hash.is_none());

        record_check(&db, watch.id, "abc123").await.unwrap();
        let watch = &list_watches(&db, "u1").await.unwrap()[0];
        assert_eq!(watch.last_hash.as_deref(), Some("abc123"));
        assert!(watch.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn remove_watch_by_url() {
        let db = Database::open_in_memory().await.unwrap();
        add_watch(&db, "u1", "https://example.com").await.unwrap();
        assert!(remove_watch(&db, "u1", "https://example.com").await.unwrap());
        assert!(!remove_watch(&db, "u1", "https://example.com").await.unwrap());
        assert!(list_watches(&db, "u1").await.unwrap().is_empty());
    }
}
