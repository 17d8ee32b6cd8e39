// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session CRUD and the active-session pointer.
//!
//! At most one session is active per user at a time, tracked in the
//! `active_sessions` pointer table separately from session history.
//! Sessions are never hard-deleted; expiry only detaches the pointer.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, warn};
use valet_core::ValetError;

use crate::database::{map_tr_err, Database};
use crate::models::Session;
use crate::now_iso;

/// Create a new session and mark it as the user's active session.
pub async fn create_session(db: &Database, session: &Session) -> Result<(), ValetError> {
    let session = session.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (user_id, session_id, model, title, created_at, last_active_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.user_id,
                    session.session_id,
                    session.model,
                    session.title,
                    session.created_at,
                    session.last_active_at,
                ],
            )?;
            conn.execute(
                "INSERT INTO active_sessions (user_id, session_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET session_id = excluded.session_id",
                params![session.user_id, session.session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get the user's active session, enforcing the idle-timeout invariant.
///
/// If the session's last-active age exceeds `timeout_hours`, the pointer is
/// evicted and `None` is returned, so the next message starts fresh.
pub async fn get_active_session(
    db: &Database,
    user_id: &str,
    timeout_hours: i64,
) -> Result<Option<Session>, ValetError> {
    get_active_session_at(db, user_id, timeout_hours, Utc::now()).await
}

/// Clock-injectable variant of [`get_active_session`] for deterministic tests.
pub async fn get_active_session_at(
    db: &Database,
    user_id: &str,
    timeout_hours: i64,
    now: DateTime<Utc>,
) -> Result<Option<Session>, ValetError> {
    let user = user_id.to_string();
    let session = db
        .connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.user_id, s.session_id, s.model, s.title, s.created_at, s.last_active_at
                 FROM active_sessions a
                 JOIN sessions s ON s.user_id = a.user_id AND s.session_id = a.session_id
                 WHERE a.user_id = ?1",
            )?;
            let result = stmt.query_row(params![user], |row| {
                Ok(Session {
                    user_id: row.get(0)?,
                    session_id: row.get(1)?,
                    model: row.get(2)?,
                    title: row.get(3)?,
                    created_at: row.get(4)?,
                    last_active_at: row.get(5)?,
                })
            });
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?;

    let Some(session) = session else {
        return Ok(None);
    };

    let expired = match DateTime::parse_from_rfc3339(&session.last_active_at) {
        Ok(last_active) => {
            let age = now.signed_duration_since(last_active.with_timezone(&Utc));
            age > chrono::Duration::hours(timeout_hours)
        }
        Err(e) => {
            warn!(error = %e, session_id = %session.session_id, "unparseable last_active_at, treating session as expired");
            true
        }
    };

    if expired {
        debug!(
            user_id,
            session_id = %session.session_id,
            "active session expired, detaching"
        );
        clear_active_session(db, user_id).await?;
        return Ok(None);
    }

    Ok(Some(session))
}

/// Refresh a session's last-active timestamp.
pub async fn touch_session(db: &Database, user_id: &str, session_id: &str) -> Result<(), ValetError> {
    let user_id = user_id.to_string();
    let session_id = session_id.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE sessions SET last_active_at = ?1 WHERE user_id = ?2 AND session_id = ?3",
                params![now, user_id, session_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Detach the user's active session without deleting any history.
pub async fn clear_active_session(db: &Database, user_id: &str) -> Result<(), ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM active_sessions WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Point the user's active session at an existing historical session (resume)
/// and refresh its last-active timestamp.
pub async fn set_active_session(
    db: &Database,
    user_id: &str,
    session_id: &str,
) -> Result<(), ValetError> {
    let user = user_id.to_string();
    let sid = session_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO active_sessions (user_id, session_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET session_id = excluded.session_id",
                params![user, sid],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    touch_session(db, user_id, session_id).await
}

/// Most recently active sessions for a user, newest first.
pub async fn get_recent_sessions(
    db: &Database,
    user_id: &str,
    limit: usize,
) -> Result<Vec<Session>, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, session_id, model, title, created_at, last_active_at
                 FROM sessions WHERE user_id = ?1
                 ORDER BY last_active_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                Ok(Session {
                    user_id: row.get(0)?,
                    session_id: row.get(1)?,
                    model: row.get(2)?,
                    title: row.get(3)?,
                    created_at: row.get(4)?,
                    last_active_at: row.get(5)?,
                })
            })?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok(sessions)
        })
        .await
        .map_err(map_tr_err)
}
