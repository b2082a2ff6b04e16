//! Async access to the turn store.
//!
//! `rusqlite` is blocking, so every query runs on the blocking pool with a
//! connection checked out for just that call.

use rusqlite::Connection;
use thiserror::Error;
use zenith_db::DbPool;
use zenith_turns::TurnError;
use zenith_types::{Role, Turn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct TurnStore {
    pool: DbPool,
}

impl TurnStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, TurnError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            Ok(f(&*conn)?)
        })
        .await?
    }

    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        message: &str,
    ) -> Result<Turn, StoreError> {
        let session_id = session_id.to_string();
        let message = message.to_string();
        self.with_conn(move |conn| zenith_turns::append_turn(conn, &session_id, role, &message))
            .await
    }

    /// Every turn of the session, oldest first.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| zenith_turns::list_turns(conn, &session_id))
            .await
    }
}
