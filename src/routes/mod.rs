mod auth;
mod health_check;

pub use auth::{
    current_session, login, logout, me, refresh, register, revoke_session, AuthResponse,
    REFRESH_COOKIE,
};
pub use health_check::health_check;
