/// JWT Claims structure
///
/// Payload shared by access and refresh tokens. `typ` tells them apart, `jti`
/// makes every token unique even when two are minted in the same second.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::principal::{Principal, Role};

/// Which of the two token kinds a JWT is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT Claims for access and refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (principal ID as decimal string)
    pub sub: String,
    /// Principal role at issue time
    pub role: Role,
    /// Token kind
    pub typ: TokenKind,
    /// Unique token ID
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Create claims issued at `now` and valid for `expiry_seconds`
    pub fn new(
        principal: Principal,
        typ: TokenKind,
        now: i64,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        Self {
            sub: principal.id.to_string(),
            role: principal.role,
            typ,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + expiry_seconds,
            iss: issuer,
        }
    }

    /// Principal ID from `sub`, `None` if it is not an integer
    pub fn principal_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }

    /// Principal described by these claims
    pub fn principal(&self) -> Option<Principal> {
        self.principal_id().map(|id| Principal::new(id, self.role))
    }

    pub fn is_expired(&self) -> bool {
        self.exp <= chrono::Utc::now().timestamp()
    }
}
