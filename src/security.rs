/// Security middleware for the public surface
/// Features:
/// - Per-IP rate limiting on the `/auth` endpoints
/// - CORS for the browser client, with credentials so the refresh cookie travels

use actix_cors::Cors;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, Method},
    Error,
};
use futures::future::LocalBoxFuture;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;
use std::rc::Rc;
use std::sync::Arc;

use crate::configuration::{CorsSettings, RateLimitSettings};
use crate::error::AppError;

type IpRateLimiter = DefaultKeyedRateLimiter<IpAddr>;

/// Token bucket per client IP
///
/// Build it once outside the `HttpServer` factory so every worker draws from
/// the same buckets. A disabled limiter lets everything through.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: Option<Arc<IpRateLimiter>>,
}

impl RateLimitMiddleware {
    pub fn new(settings: &RateLimitSettings) -> Self {
        if !settings.enabled {
            tracing::warn!("Rate limiting disabled");
            return Self { limiter: None };
        }

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(settings.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            limiter: Some(Arc::new(RateLimiter::keyed(quota))),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Option<Arc<IpRateLimiter>>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        if let Some(limiter) = &self.limiter {
            // Requests without a peer address share one bucket
            let ip = req
                .peer_addr()
                .map(|addr| addr.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

            if limiter.check_key(&ip).is_err() {
                tracing::warn!(ip = %ip, path = %req.path(), "Rate limit exceeded");
                let response = AppError::RateLimited.to_http_response();
                return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
    }
}

/// CORS policy for the configured browser origins
///
/// Credentials are allowed, so a wildcard origin is never accepted.
pub fn cors(settings: &CorsSettings) -> Cors {
    let base = Cors::default()
        .allowed_methods([Method::GET, Method::POST, Method::DELETE, Method::PATCH])
        .allowed_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .supports_credentials()
        .max_age(3600);

    settings
        .allowed_origins
        .iter()
        .filter(|origin| {
            let usable = origin.as_str() != "*" && origin.parse::<actix_web::http::Uri>().is_ok();
            if !usable {
                tracing::warn!(origin = %origin, "Ignoring unusable CORS origin");
            }
            usable
        })
        .fold(base, |cors, origin| cors.allowed_origin(origin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, read_body_json, TestRequest};
    use actix_web::{web, App, HttpResponse};
    use std::net::SocketAddr;

    fn limit(enabled: bool, burst: u32) -> RateLimitSettings {
        RateLimitSettings {
            enabled,
            requests_per_second: 1,
            burst,
        }
    }

    fn from(ip: &str) -> TestRequest {
        let addr: SocketAddr = format!("{}:40000", ip).parse().unwrap();
        TestRequest::post().uri("/login").peer_addr(addr)
    }

    #[actix_web::test]
    async fn test_burst_then_429() {
        let app = init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(&limit(true, 2)))
                .route("/login", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        assert_eq!(call_service(&app, from("10.0.0.1").to_request()).await.status(), StatusCode::OK);
        assert_eq!(call_service(&app, from("10.0.0.1").to_request()).await.status(), StatusCode::OK);

        let resp = call_service(&app, from("10.0.0.1").to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: serde_json::Value = read_body_json(resp).await;
        assert_eq!(body["code"], "RATE_LIMITED");
    }

    #[actix_web::test]
    async fn test_buckets_are_per_ip() {
        let app = init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(&limit(true, 1)))
                .route("/login", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        assert_eq!(call_service(&app, from("10.0.0.1").to_request()).await.status(), StatusCode::OK);
        assert_eq!(
            call_service(&app, from("10.0.0.1").to_request()).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(call_service(&app, from("10.0.0.2").to_request()).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_disabled_limiter_passes_everything() {
        let app = init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(&limit(false, 1)))
                .route("/login", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for _ in 0..5 {
            let resp = call_service(&app, from("10.0.0.1").to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    #[actix_web::test]
    async fn test_preflight_allows_configured_origin_with_credentials() {
        let settings = CorsSettings {
            allowed_origins: vec!["*".to_string(), "http://localhost:3000".to_string()],
        };
        let app = init_service(
            App::new()
                .wrap(cors(&settings))
                .route("/auth/login", web::post().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = TestRequest::default()
            .method(Method::OPTIONS)
            .uri("/auth/login")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
            .to_request();
        let resp = call_service(&app, req).await;

        assert!(resp.status().is_success());
        let headers = resp.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }
}
