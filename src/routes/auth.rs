/// Authentication Routes
///
/// Registration, login, refresh and logout under `/auth`, plus the
/// session endpoints under `/api` that sit behind `JwtMiddleware`.
///
/// Every response that hands out a refresh token also sets it as the
/// `refreshToken` HTTP-only cookie; logout and revocation clear it.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthenticatedSession, NewAccount, Principal, Role, SessionManager};
use crate::configuration::AuthSettings;
use crate::error::{AppError, DatabaseError, ErrorContext};

pub const REFRESH_COOKIE: &str = "refreshToken";

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub lastname: String,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh/logout body; the cookie is used when the token is absent here
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Authentication response with access and refresh tokens
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserSummary,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub created_at: String,
    pub expires_at: String,
}

/// POST /auth/register
///
/// # Errors
/// - 400: Validation errors (invalid email, password or name)
/// - 409: Email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");
    let form = form.into_inner();

    let session = manager
        .register(NewAccount {
            email: form.email,
            password: form.password,
            name: form.name,
            lastname: form.lastname,
        })
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %session.principal.id,
        "User registered successfully"
    );

    Ok(auth_response(HttpResponse::Created(), session, &manager, &settings))
}

/// POST /auth/login
///
/// # Errors
/// - 401: Invalid credentials (unknown email or wrong password, indistinguishable)
pub async fn login(
    form: web::Json<LoginRequest>,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let session = manager.login(&form.email, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %session.principal.id,
        "User logged in successfully"
    );

    Ok(auth_response(HttpResponse::Ok(), session, &manager, &settings))
}

/// POST /auth/refresh
///
/// Rotates the refresh token. The token comes from the JSON body or, failing
/// that, the `refreshToken` cookie.
pub async fn refresh(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let presented = presented_refresh_token(&req, body).ok_or_else(|| {
        tracing::warn!(
            request_id = %context.request_id,
            operation = %context.operation,
            "Refresh without a token"
        );
        AppError::invalid_credentials()
    })?;

    let session = manager.refresh(&presented).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %session.principal.id,
        "Token refreshed successfully"
    );

    Ok(auth_response(HttpResponse::Ok(), session, &manager, &settings))
}

/// POST /auth/logout
///
/// Always 204. Drops the session the presented token belongs to, if any.
pub async fn logout(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout");

    if let Some(presented) = presented_refresh_token(&req, body) {
        manager.logout(&presented).await?;
    }

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        "User logged out"
    );

    Ok(HttpResponse::NoContent()
        .cookie(removal_cookie(&settings))
        .finish())
}

/// GET /api/me
pub async fn me(principal: Principal) -> HttpResponse {
    HttpResponse::Ok().json(principal)
}

/// GET /api/auth/session
///
/// # Errors
/// - 404: The caller has no live refresh session
pub async fn current_session(
    principal: Principal,
    manager: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let session = manager
        .active_session(principal.id)
        .await?
        .ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!(
                "No refresh session for user {}",
                principal.id
            )))
        })?;

    Ok(HttpResponse::Ok().json(SessionResponse {
        id: session.id.to_string(),
        created_at: session.created_at.to_rfc3339(),
        expires_at: session.expires_at.to_rfc3339(),
    }))
}

/// DELETE /api/auth/session
///
/// Signs the caller out everywhere.
pub async fn revoke_session(
    principal: Principal,
    manager: web::Data<SessionManager>,
    settings: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("session_revoke");

    manager.revoke_all(principal.id).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %principal.id,
        "Sessions revoked"
    );

    Ok(HttpResponse::NoContent()
        .cookie(removal_cookie(&settings))
        .finish())
}

fn presented_refresh_token(
    req: &HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
) -> Option<String> {
    body.and_then(|body| body.into_inner().refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| {
            req.cookie(REFRESH_COOKIE)
                .map(|cookie| cookie.value().to_string())
        })
        .filter(|token| !token.is_empty())
}

fn auth_response(
    mut builder: actix_web::HttpResponseBuilder,
    session: AuthenticatedSession,
    manager: &SessionManager,
    settings: &AuthSettings,
) -> HttpResponse {
    builder
        .cookie(refresh_cookie(&session.refresh_token, settings))
        .json(AuthResponse {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: manager.codec().access_token_ttl(),
            user: UserSummary {
                id: session.principal.id,
                email: session.email,
                role: session.principal.role,
            },
        })
}

fn refresh_cookie<'c>(token: &str, settings: &AuthSettings) -> Cookie<'c> {
    Cookie::build(REFRESH_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.secure_cookie)
        .max_age(CookieDuration::seconds(settings.refresh_token_expiry))
        .finish()
}

fn removal_cookie<'c>(settings: &AuthSettings) -> Cookie<'c> {
    let mut cookie = refresh_cookie("", settings);
    cookie.make_removal();
    cookie
}
