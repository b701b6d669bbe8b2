/// JWT Authentication Middleware
///
/// Verifies the access token in the Authorization header and attaches the
/// caller's `Principal` to the request extensions. Requests without a valid
/// token are answered with 401 here and never reach the wrapped service.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::TokenCodec;
use crate::error::{AppError, AuthError};

const BEARER_SCHEME: &str = "Bearer";

/// JWT middleware for protecting routes
///
/// Must be applied to routes that require authentication.
pub struct JwtMiddleware {
    codec: TokenCodec,
}

impl JwtMiddleware {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            codec: self.codec.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    codec: TokenCodec,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = match bearer_token(&req) {
            Some(token) => token,
            None => {
                tracing::warn!(path = %req.path(), "Missing or malformed Authorization header");
                return reject(req, AuthError::MissingToken);
            }
        };

        let claims = match self.codec.verify_access(&token) {
            Ok(claims) => claims,
            Err(reason) => {
                tracing::warn!(path = %req.path(), reason = %reason, "Access token rejected");
                return reject(req, AuthError::TokenInvalid);
            }
        };

        let principal = match claims.principal() {
            Some(principal) => principal,
            None => return reject(req, AuthError::TokenInvalid),
        };

        req.extensions_mut().insert(principal);
        tracing::debug!(user_id = %principal.id, role = %principal.role, "Access token accepted");

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

/// Token from an `Authorization: Bearer <token>` header, if well formed
///
/// The scheme name is matched case-insensitively (RFC 7235 §2.1), so
/// `bearer` and `BEARER` are accepted. Exactly one space separates the
/// scheme from the token and the token itself holds no whitespace.
fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }

    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return None;
    }

    Some(token.to_string())
}

fn reject<B: 'static>(
    req: ServiceRequest,
    error: AuthError,
) -> LocalBoxFuture<'static, Result<ServiceResponse<EitherBody<B>>, Error>> {
    let response = AppError::Auth(error).to_http_response();
    Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
}
