/// Credential Store
///
/// Where password hashes and roles live. The session manager only needs a lookup
/// by email and an insert for registration.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::auth::principal::{Principal, Role};
use crate::error::{AppError, DatabaseError};

/// Row handed to the session manager during login
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

type CredentialRow = (i64, String, String, String);

impl StoredCredential {
    fn from_row((id, email, password_hash, role): CredentialRow) -> Result<Self, AppError> {
        Ok(Self {
            id,
            email,
            password_hash,
            role: role.parse()?,
        })
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.id, self.role)
    }
}

/// Account to insert on registration
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub email: String,
    pub name: String,
    pub lastname: String,
    pub password_hash: String,
    pub role: Role,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up an account by email; `None` when there is no such account
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredCredential>, AppError>;

    /// Insert a new account and return its ID; duplicate email is a 409
    async fn insert(&self, credential: NewCredential) -> Result<i64, AppError>;
}

/// `users` table in Postgres
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, email, password_hash, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCredential::from_row).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredCredential>, AppError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, email, password_hash, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredCredential::from_row).transpose()
    }

    async fn insert(&self, credential: NewCredential) -> Result<i64, AppError> {
        let now = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (email, name, lastname, password_hash, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&credential.email)
        .bind(&credential.name)
        .bind(&credential.lastname)
        .bind(&credential.password_hash)
        .bind(credential.role.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

/// Process-local credential store for tests and database-less runs
#[derive(Default)]
pub struct InMemoryCredentialStore {
    inner: Mutex<InMemoryCredentials>,
}

#[derive(Default)]
struct InMemoryCredentials {
    next_id: i64,
    by_email: HashMap<String, StoredCredential>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account whose password is already hashed
    pub fn with_account(self, email: &str, password_hash: &str, role: Role) -> Self {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.next_id += 1;
            let id = inner.next_id;
            inner.by_email.insert(
                email.to_string(),
                StoredCredential {
                    id,
                    email: email.to_string(),
                    password_hash: password_hash.to_string(),
                    role,
                },
            );
        }
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryCredentials>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError> {
        Ok(self.lock()?.by_email.get(email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<StoredCredential>, AppError> {
        Ok(self
            .lock()?
            .by_email
            .values()
            .find(|credential| credential.id == id)
            .cloned())
    }

    async fn insert(&self, credential: NewCredential) -> Result<i64, AppError> {
        let mut inner = self.lock()?;
        if inner.by_email.contains_key(&credential.email) {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "users_email_key".to_string(),
            )));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_email.insert(
            credential.email.clone(),
            StoredCredential {
                id,
                email: credential.email,
                password_hash: credential.password_hash,
                role: credential.role,
            },
        );
        Ok(id)
    }
}
