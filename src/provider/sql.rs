// src/provider/sql.rs
// Relational backend on SQLite
//
// Table: session(session_key, session_data, session_expiry). session_expiry
// is the unix time of the last write; a row is live while
// session_expiry >= now - max_lifetime.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{IntoConnectionError, SessionError, SessionResult};
use crate::provider::{ProviderFactory, SessionProvider};
use crate::store::{SessionMap, SessionStore, decode_values};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    session_key    TEXT PRIMARY KEY NOT NULL,
    session_data   BLOB,
    session_expiry INTEGER NOT NULL
)
"#;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct SqlProvider {
    pool: SqlitePool,
    /// Dedicated connection so a long purge never starves request traffic
    gc_pool: SqlitePool,
    max_lifetime: u64,
}

impl SqlProvider {
    pub async fn connect(dsn: &str, max_lifetime: u64) -> SessionResult<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| SessionError::config(format!("sqlite dsn: {}", e)))?
            .create_if_missing(true);

        // every connection to an in-memory database is its own database
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 10 })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options.clone())
            .await
            .into_connection_error("sqlite connect")?;

        let gc_pool = if in_memory {
            pool.clone()
        } else {
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(30))
                .connect_with(options)
                .await
                .into_connection_error("sqlite gc connect")?
        };

        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        Ok(Self {
            pool,
            gc_pool,
            max_lifetime,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn live_after(&self) -> i64 {
        now_unix() - i64::try_from(self.max_lifetime).unwrap_or(i64::MAX)
    }

    async fn load(&self, sid: &str) -> SessionResult<Option<Vec<u8>>> {
        let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as(
            "SELECT session_data FROM session WHERE session_key = ? AND session_expiry >= ?",
        )
        .bind(sid)
        .bind(self.live_after())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(data,)| data.unwrap_or_default()))
    }
}

#[async_trait]
impl SessionProvider for SqlProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn read(self: Arc<Self>, sid: &str) -> SessionResult<SessionStore> {
        // no row is created here; release upserts
        let values = match self.load(sid).await? {
            Some(data) => decode_values(&data)?,
            None => SessionMap::new(),
        };
        Ok(SessionStore::new(sid, values, self))
    }

    async fn exists(&self, sid: &str) -> SessionResult<bool> {
        Ok(self.load(sid).await?.is_some())
    }

    async fn regenerate(self: Arc<Self>, old_sid: &str, new_sid: &str) -> SessionResult<SessionStore> {
        let Some(data) = self.load(old_sid).await? else {
            debug!("Regenerate: {} unknown, starting empty session {}", old_sid, new_sid);
            return Ok(SessionStore::new(new_sid, SessionMap::new(), self));
        };
        let values = decode_values(&data)?;

        // session_expiry moves with the key, so the remaining lifetime is kept
        sqlx::query("UPDATE session SET session_key = ? WHERE session_key = ?")
            .bind(new_sid)
            .bind(old_sid)
            .execute(&self.pool)
            .await?;

        Ok(SessionStore::new(new_sid, values, self))
    }

    async fn destroy(&self, sid: &str) -> SessionResult<()> {
        sqlx::query("DELETE FROM session WHERE session_key = ?")
            .bind(sid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn gc(&self) -> SessionResult<u64> {
        let result = sqlx::query("DELETE FROM session WHERE session_expiry < ?")
            .bind(self.live_after())
            .execute(&self.gc_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> SessionResult<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM session WHERE session_expiry >= ?")
                .bind(self.live_after())
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn write(&self, sid: &str, data: Vec<u8>) -> SessionResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session (session_key, session_data, session_expiry)
            VALUES (?, ?, ?)
            ON CONFLICT(session_key) DO UPDATE SET
                session_data = excluded.session_data,
                session_expiry = excluded.session_expiry
            "#,
        )
        .bind(sid)
        .bind(data)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Factory for the `sqlite` provider. The connection string is a sqlx DSN such as
/// `sqlite://sessions.db` or `sqlite::memory:`.
pub struct SqliteFactory;

#[async_trait]
impl ProviderFactory for SqliteFactory {
    async fn init(&self, max_lifetime: u64, config: &str) -> SessionResult<Arc<dyn SessionProvider>> {
        let dsn = if config.trim().is_empty() {
            "sqlite::memory:"
        } else {
            config.trim()
        };
        let provider = SqlProvider::connect(dsn, max_lifetime).await?;
        info!("SQLite session provider ready ({})", dsn);
        Ok(Arc::new(provider))
    }
}
