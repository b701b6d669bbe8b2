use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{CredentialStore, RefreshSessionStore, SessionManager, TokenCodec};
use crate::configuration::{AuthSettings, SecuritySettings};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    current_session, health_check, login, logout, me, refresh, register, revoke_session,
};
use crate::security::{cors, RateLimitMiddleware};

pub fn run(
    listener: TcpListener,
    auth: AuthSettings,
    security: SecuritySettings,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn RefreshSessionStore>,
) -> Result<Server, std::io::Error> {
    let codec = TokenCodec::new(&auth);
    let manager = SessionManager::new(codec.clone(), credentials, sessions, auth.bcrypt_cost)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let manager = web::Data::new(manager);
    let auth = web::Data::new(auth);

    // One limiter for all workers
    let rate_limit = RateLimitMiddleware::new(&security.rate_limit);
    let cors_settings = security.cors;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&cors_settings))
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(manager.clone())
            .app_data(auth.clone())

            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .wrap(rate_limit.clone())
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout)),
            )

            // Protected routes (require JWT authentication)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(codec.clone()))
                    .route("/me", web::get().to(me))
                    .service(
                        web::resource("/auth/session")
                            .route(web::get().to(current_session))
                            .route(web::delete().to(revoke_session)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
