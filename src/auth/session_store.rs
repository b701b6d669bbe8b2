/// Refresh Session Store
///
/// At most one refresh session per principal. Rows carry a SHA-256 digest of the
/// refresh token, never the token itself.
///
/// - `issue` replaces whatever the principal had (single statement upsert)
/// - `rotate` swaps the token only if the presented one is still current
/// - `revoke_*` are idempotent deletes

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Stored refresh session
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshSession {
    pub id: Uuid,
    pub principal_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    fn new(principal_id: i64, token: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            token_hash: hash_token(token),
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether `token` is the one this session was issued for
    pub fn matches(&self, token: &str) -> bool {
        self.token_hash == hash_token(token)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Hash a refresh token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
pub trait RefreshSessionStore: Send + Sync {
    /// Store `token` as the principal's only session, replacing any previous one
    async fn issue(
        &self,
        principal_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError>;

    /// Swap `presented` for `replacement` if `presented` is the live session.
    ///
    /// `None` when it was superseded, revoked or has expired.
    async fn rotate(
        &self,
        principal_id: i64,
        presented: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError>;

    async fn get_by_principal(&self, principal_id: i64)
        -> Result<Option<RefreshSession>, AppError>;

    async fn revoke_by_principal(&self, principal_id: i64) -> Result<(), AppError>;

    async fn revoke_by_token(&self, token: &str) -> Result<(), AppError>;
}

/// `refresh_sessions` table in Postgres
pub struct PgRefreshSessionStore {
    pool: PgPool,
}

impl PgRefreshSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshSessionStore for PgRefreshSessionStore {
    async fn issue(
        &self,
        principal_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError> {
        let session = RefreshSession::new(principal_id, token, expires_at);

        let stored = sqlx::query_as::<_, RefreshSession>(
            r#"
            INSERT INTO refresh_sessions (id, principal_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (principal_id) DO UPDATE
            SET id = EXCLUDED.id,
                token_hash = EXCLUDED.token_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            RETURNING id, principal_id, token_hash, expires_at, created_at
            "#,
        )
        .bind(session.id)
        .bind(session.principal_id)
        .bind(&session.token_hash)
        .bind(session.expires_at)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn rotate(
        &self,
        principal_id: i64,
        presented: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError> {
        let rotated = sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_sessions
            SET id = $1, token_hash = $2, expires_at = $3, created_at = $4
            WHERE principal_id = $5 AND token_hash = $6 AND expires_at > $4
            RETURNING id, principal_id, token_hash, expires_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(hash_token(replacement))
        .bind(expires_at)
        .bind(Utc::now())
        .bind(principal_id)
        .bind(hash_token(presented))
        .fetch_optional(&self.pool)
        .await?;

        Ok(rotated)
    }

    async fn get_by_principal(
        &self,
        principal_id: i64,
    ) -> Result<Option<RefreshSession>, AppError> {
        let session = sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT id, principal_id, token_hash, expires_at, created_at
            FROM refresh_sessions
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn revoke_by_principal(&self, principal_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE principal_id = $1")
            .bind(principal_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn revoke_by_token(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM refresh_sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Mutex-guarded map keyed by principal ID
#[derive(Default)]
pub struct InMemoryRefreshSessionStore {
    sessions: Mutex<HashMap<i64, RefreshSession>>,
}

impl InMemoryRefreshSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub fn len(&self) -> Result<usize, AppError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<i64, RefreshSession>>, AppError> {
        self.sessions
            .lock()
            .map_err(|_| AppError::Internal("refresh session store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RefreshSessionStore for InMemoryRefreshSessionStore {
    async fn issue(
        &self,
        principal_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, AppError> {
        let session = RefreshSession::new(principal_id, token, expires_at);
        self.lock()?.insert(principal_id, session.clone());
        Ok(session)
    }

    async fn rotate(
        &self,
        principal_id: i64,
        presented: &str,
        replacement: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<RefreshSession>, AppError> {
        let mut sessions = self.lock()?;
        let is_current = matches!(
            sessions.get(&principal_id),
            Some(current) if current.matches(presented) && !current.is_expired()
        );
        if !is_current {
            return Ok(None);
        }

        let session = RefreshSession::new(principal_id, replacement, expires_at);
        sessions.insert(principal_id, session.clone());
        Ok(Some(session))
    }

    async fn get_by_principal(
        &self,
        principal_id: i64,
    ) -> Result<Option<RefreshSession>, AppError> {
        Ok(self.lock()?.get(&principal_id).cloned())
    }

    async fn revoke_by_principal(&self, principal_id: i64) -> Result<(), AppError> {
        self.lock()?.remove(&principal_id);
        Ok(())
    }

    async fn revoke_by_token(&self, token: &str) -> Result<(), AppError> {
        let token_hash = hash_token(token);
        self.lock()?
            .retain(|_, session| session.token_hash != token_hash);
        Ok(())
    }
}
