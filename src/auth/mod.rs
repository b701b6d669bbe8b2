/// Authentication module
///
/// Handles JWT issue/verification, password hashing, credential lookup and the
/// single refresh session each principal may hold.

mod claims;
mod credentials;
mod jwt;
mod password;
mod principal;
mod session;
mod session_store;

pub use claims::{Claims, TokenKind};
pub use credentials::{
    CredentialStore, InMemoryCredentialStore, NewCredential, PgCredentialStore, StoredCredential,
};
pub use jwt::{TokenCodec, TokenError};
pub use password::{hash_password, verify_password};
pub use principal::{Principal, Role};
pub use session::{AuthenticatedSession, NewAccount, SessionManager};
pub use session_store::{
    hash_token, InMemoryRefreshSessionStore, PgRefreshSessionStore, RefreshSession,
    RefreshSessionStore,
};
