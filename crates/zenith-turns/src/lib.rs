//! Conversation history for Zenith.
//!
//! A conversational session is nothing more than a `session_id` grouping a
//! sequence of [`Turn`]s. There is no session record: a session exists once
//! its first turn is appended, and it is never deleted.
//!
//! The store is append-only. Nothing in this crate updates or deletes a turn,
//! and reads always return turns in strict append order.

use rusqlite::{params, Connection, Row};
use thiserror::Error;
use uuid::Uuid;
use zenith_types::{Role, Turn};

/// Errors that can occur during turn store operations.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("session id must not be empty")]
    EmptySessionId,
}

/// Mints a fresh conversational session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Appends a turn to a session and returns the stored record.
pub fn append_turn(
    conn: &Connection,
    session_id: &str,
    role: Role,
    message: &str,
) -> Result<Turn, TurnError> {
    if session_id.trim().is_empty() {
        return Err(TurnError::EmptySessionId);
    }

    let turn = conn.query_row(
        "INSERT INTO turns (session_id, role, message)
         VALUES (?1, ?2, ?3)
         RETURNING id, session_id, role, message, created_at",
        params![session_id, role.as_str(), message],
        map_row_to_turn,
    )?;

    tracing::debug!(
        session_id = %turn.session_id,
        turn_id = turn.id,
        role = %turn.role,
        "appended turn"
    );

    Ok(turn)
}

/// Lists every turn of a session, oldest first.
pub fn list_turns(conn: &Connection, session_id: &str) -> Result<Vec<Turn>, TurnError> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, message, created_at
         FROM turns
         WHERE session_id = ?1
         ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![session_id], map_row_to_turn)?;

    let mut turns = Vec::new();
    for row in rows {
        turns.push(row?);
    }
    Ok(turns)
}

/// Returns the number of turns recorded for a session.
pub fn count_turns(conn: &Connection, session_id: &str) -> Result<usize, TurnError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Returns the last `limit` turns, most recent last.
///
/// When the history holds `limit` turns or fewer, all of them are returned.
pub fn recent_turns(turns: &[Turn], limit: usize) -> &[Turn] {
    let start = turns.len().saturating_sub(limit);
    &turns[start..]
}

fn map_row_to_turn(row: &Row) -> rusqlite::Result<Turn> {
    let role: String = row.get(2)?;
    let role = role.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Turn {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        message: row.get(3)?,
        created_at: row.get(4)?,
    })
}
