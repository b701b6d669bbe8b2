/// Session Manager
///
/// Login, registration, refresh and logout on top of the credential store, the
/// refresh session store and the token codec. Every credential or token problem
/// surfaces as the same `InvalidCredentials` error; the reason is only logged.
///
/// Policies:
/// - One refresh session per principal; a new login replaces the old one
/// - Every refresh rotates the refresh token
/// - bcrypt runs on the blocking pool

use std::sync::Arc;

use actix_web::web;
use chrono::{DateTime, Duration, Utc};

use crate::auth::credentials::{CredentialStore, NewCredential};
use crate::auth::jwt::TokenCodec;
use crate::auth::password::{dummy_hash, hash_password, verify_against_dummy, verify_password};
use crate::auth::principal::{Principal, Role};
use crate::auth::session_store::{RefreshSession, RefreshSessionStore};
use crate::error::AppError;
use crate::validators::{parse_email, parse_name};

/// Registration input
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub name: String,
    pub lastname: String,
}

/// Result of a successful login, registration or refresh
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub principal: Principal,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct SessionManager {
    codec: TokenCodec,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn RefreshSessionStore>,
    bcrypt_cost: u32,
    dummy_hash: Arc<str>,
}

impl SessionManager {
    /// # Errors
    /// Fails when `bcrypt_cost` is outside what bcrypt accepts
    pub fn new(
        codec: TokenCodec,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn RefreshSessionStore>,
        bcrypt_cost: u32,
    ) -> Result<Self, AppError> {
        let dummy_hash = dummy_hash(bcrypt_cost)?;

        Ok(Self {
            codec,
            credentials,
            sessions,
            bcrypt_cost,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Exchange email and password for a fresh token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedSession, AppError> {
        let email = email.trim().to_lowercase();
        let credential = self.credentials.find_by_email(&email).await?;
        let password = password.to_string();

        let credential = match credential {
            Some(credential) => {
                let hash = credential.password_hash.clone();
                let verified = web::block(move || verify_password(&password, &hash)).await??;
                if !verified {
                    tracing::warn!(user_id = %credential.id, "Login rejected: password mismatch");
                    return Err(AppError::invalid_credentials());
                }
                credential
            }
            None => {
                let dummy = self.dummy_hash.clone();
                web::block(move || verify_against_dummy(&password, &dummy)).await?;
                tracing::warn!("Login rejected: unknown account");
                return Err(AppError::invalid_credentials());
            }
        };

        let session = self
            .start_session(credential.principal(), credential.email)
            .await?;

        tracing::info!(user_id = %session.principal.id, "User logged in");
        Ok(session)
    }

    /// Create a STUDENT account and log it in
    pub async fn register(&self, account: NewAccount) -> Result<AuthenticatedSession, AppError> {
        let email = parse_email(&account.email)?;
        let name = parse_name("name", &account.name)?;
        let lastname = parse_name("lastname", &account.lastname)?;

        let cost = self.bcrypt_cost;
        let password = account.password;
        let password_hash = web::block(move || hash_password(&password, cost)).await??;

        let id = self
            .credentials
            .insert(NewCredential {
                email: email.clone(),
                name,
                lastname,
                password_hash,
                role: Role::Student,
            })
            .await?;

        let session = self
            .start_session(Principal::new(id, Role::Student), email)
            .await?;

        tracing::info!(user_id = %id, "User registered");
        Ok(session)
    }

    /// Mint a token pair and make its refresh token the principal's only session
    pub async fn start_session(
        &self,
        principal: Principal,
        email: String,
    ) -> Result<AuthenticatedSession, AppError> {
        let access_token = self.codec.issue_access_token(principal)?;
        let refresh_token = self.codec.issue_refresh_token(principal)?;

        self.sessions
            .issue(principal.id, &refresh_token, self.refresh_expiry())
            .await?;

        Ok(AuthenticatedSession {
            principal,
            email,
            access_token,
            refresh_token,
        })
    }

    /// Trade a live refresh token for a new pair; the presented token stops working
    pub async fn refresh(&self, presented: &str) -> Result<AuthenticatedSession, AppError> {
        let claims = self.codec.verify_refresh(presented).map_err(|reason| {
            tracing::warn!(reason = %reason, "Refresh rejected");
            AppError::invalid_credentials()
        })?;
        let principal_id = claims.principal_id().ok_or_else(AppError::invalid_credentials)?;

        // The stored account is authoritative for the role, not the old claims
        let account = self
            .credentials
            .find_by_id(principal_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %principal_id, "Refresh rejected: account no longer exists");
                AppError::invalid_credentials()
            })?;
        let principal = account.principal();

        let replacement = self.codec.issue_refresh_token(principal)?;
        let rotated = self
            .sessions
            .rotate(principal.id, presented, &replacement, self.refresh_expiry())
            .await?;

        if rotated.is_none() {
            tracing::warn!(user_id = %principal.id, "Refresh rejected: token is not the live session");
            return Err(AppError::invalid_credentials());
        }

        let access_token = self.codec.issue_access_token(principal)?;

        tracing::info!(user_id = %principal.id, "Session refreshed");
        Ok(AuthenticatedSession {
            principal,
            email: account.email,
            access_token,
            refresh_token: replacement,
        })
    }

    /// Drop the session the token belongs to. Unknown tokens are fine.
    pub async fn logout(&self, presented: &str) -> Result<(), AppError> {
        self.sessions.revoke_by_token(presented).await?;
        tracing::info!("Session logged out");
        Ok(())
    }

    /// The principal's live refresh session; an expired one counts as none
    pub async fn active_session(&self, principal_id: i64) -> Result<Option<RefreshSession>, AppError> {
        let session = self.sessions.get_by_principal(principal_id).await?;
        Ok(session.filter(|session| !session.is_expired()))
    }

    /// Sign out everywhere
    pub async fn revoke_all(&self, principal_id: i64) -> Result<(), AppError> {
        self.sessions.revoke_by_principal(principal_id).await?;
        tracing::info!(user_id = %principal_id, "All sessions revoked");
        Ok(())
    }

    fn refresh_expiry(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.codec.refresh_token_ttl())
    }
}
