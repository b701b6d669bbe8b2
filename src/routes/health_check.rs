use actix_web::HttpResponse;

/// GET /health_check
///
/// Liveness only; does not touch the stores.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}
