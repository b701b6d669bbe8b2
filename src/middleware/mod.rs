/// Request guards for the `/api` scope.

mod jwt_middleware;

pub use jwt_middleware::JwtMiddleware;
