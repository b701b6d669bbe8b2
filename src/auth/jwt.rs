/// JWT Token Codec
///
/// Issues and verifies HS256-signed access and refresh tokens. The codec is built
/// once from `AuthSettings` and holds no mutable state; cloning it shares the
/// same keys.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{Claims, TokenKind};
use crate::auth::principal::Principal;
use crate::configuration::AuthSettings;
use crate::error::AppError;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Why a token was rejected. Logged, never shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Signature, algorithm or issuer did not match
    InvalidSignature,
    /// Signature is fine but `exp` has passed
    Expired,
    /// Not a decodable JWT, or claims of the wrong shape
    Malformed,
    /// A valid token of the other kind
    UnexpectedKind,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::InvalidSignature => write!(f, "token signature rejected"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Malformed => write!(f, "token malformed"),
            TokenError::UnexpectedKind => write!(f, "unexpected token kind"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidIssuer
            | ErrorKind::ImmatureSignature => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Signs and verifies tokens with a process-wide symmetric secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_token_expiry: i64,
    refresh_token_expiry: i64,
}

impl TokenCodec {
    pub fn new(config: &AuthSettings) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            access_token_expiry: config.access_token_expiry,
            refresh_token_expiry: config.refresh_token_expiry,
        }
    }

    /// Access token lifetime in seconds
    pub fn access_token_ttl(&self) -> i64 {
        self.access_token_expiry
    }

    /// Refresh token lifetime in seconds
    pub fn refresh_token_ttl(&self) -> i64 {
        self.refresh_token_expiry
    }

    pub fn issue_access_token(&self, principal: Principal) -> Result<String, AppError> {
        self.issue_at(principal, TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh_token(&self, principal: Principal) -> Result<String, AppError> {
        self.issue_at(principal, TokenKind::Refresh, Utc::now())
    }

    /// Issue a token as if the clock read `now`
    pub(crate) fn issue_at(
        &self,
        principal: Principal,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let expiry = match kind {
            TokenKind::Access => self.access_token_expiry,
            TokenKind::Refresh => self.refresh_token_expiry,
        };
        let claims = Claims::new(principal, kind, now.timestamp(), expiry, self.issuer.clone());

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature, algorithm, issuer, expiry and kind, then return the claims
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(TokenError::from)
            .map_err(|e| {
                tracing::debug!(reason = %e, "token rejected");
                e
            })?;

        if claims.typ != expected {
            tracing::debug!(expected = ?expected, found = ?claims.typ, "token rejected");
            return Err(TokenError::UnexpectedKind);
        }
        if claims.principal_id().is_none() {
            tracing::debug!("token rejected: non-numeric subject");
            return Err(TokenError::Malformed);
        }

        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Refresh)
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::Role;
    use chrono::Duration;

    fn get_test_config() -> AuthSettings {
        AuthSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
            bcrypt_cost: 4,
            secure_cookie: false,
        }
    }

    fn student() -> Principal {
        Principal::new(17, Role::Student)
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let codec = TokenCodec::new(&get_test_config());
        for principal in [student(), Principal::new(2, Role::Teacher), Principal::new(3, Role::Admin)] {
            let token = codec.issue_access_token(principal).expect("Failed to issue token");
            let claims = codec.verify_access(&token).expect("Failed to verify token");

            assert_eq!(claims.principal(), Some(principal));
            assert_eq!(claims.iss, "test");
            assert_eq!(claims.exp - claims.iat, 3600);
        }
    }

    #[test]
    fn test_refresh_token_uses_refresh_ttl() {
        let codec = TokenCodec::new(&get_test_config());
        let token = codec.issue_refresh_token(student()).unwrap();
        let claims = codec.verify_refresh(&token).unwrap();

        assert_eq!(claims.typ, TokenKind::Refresh);
        assert_eq!(claims.exp - claims.iat, 604800);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let codec = TokenCodec::new(&get_test_config());
        let two_hours_ago = Utc::now() - Duration::hours(2);
        let token = codec
            .issue_at(student(), TokenKind::Access, two_hours_ago)
            .unwrap();

        assert_eq!(codec.verify_access(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_token_expiring_just_now_is_rejected() {
        let codec = TokenCodec::new(&get_test_config());
        let issued = Utc::now() - Duration::seconds(3601);
        let token = codec.issue_at(student(), TokenKind::Access, issued).unwrap();

        assert_eq!(codec.verify_access(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_different_secret_is_rejected() {
        let codec = TokenCodec::new(&get_test_config());
        let mut other_config = get_test_config();
        other_config.secret = "a-completely-different-secret-of-some-length".to_string();
        let other = TokenCodec::new(&other_config);

        let token = other.issue_access_token(student()).unwrap();
        assert_eq!(
            codec.verify_access(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn test_other_algorithm_is_rejected() {
        let config = get_test_config();
        let codec = TokenCodec::new(&config);
        let claims = Claims::new(
            student(),
            TokenKind::Access,
            Utc::now().timestamp(),
            3600,
            config.issuer.clone(),
        );
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            codec.verify_access(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn test_wrong_issuer() {
        let mut config = get_test_config();
        let token = TokenCodec::new(&config).issue_access_token(student()).unwrap();

        config.issuer = "wrong-issuer".to_string();
        let result = TokenCodec::new(&config).verify_access(&token);

        assert_eq!(result.unwrap_err(), TokenError::InvalidSignature);
    }

    #[test]
    fn test_tampered_token() {
        let codec = TokenCodec::new(&get_test_config());
        let token = codec.issue_access_token(student()).unwrap();

        let tampered = format!("{}X", token);
        assert!(codec.verify_access(&tampered).is_err());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = TokenCodec::new(&get_test_config());
        assert_eq!(codec.verify_access("garbage").unwrap_err(), TokenError::Malformed);
        assert_eq!(codec.verify_access("").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        let codec = TokenCodec::new(&get_test_config());
        let access = codec.issue_access_token(student()).unwrap();
        let refresh = codec.issue_refresh_token(student()).unwrap();

        assert_eq!(codec.verify_refresh(&access).unwrap_err(), TokenError::UnexpectedKind);
        assert_eq!(codec.verify_access(&refresh).unwrap_err(), TokenError::UnexpectedKind);
    }

    #[test]
    fn test_debug_hides_keys() {
        let codec = TokenCodec::new(&get_test_config());
        let debug = format!("{:?}", codec);
        assert!(!debug.contains("test-secret-key"));
    }
}
