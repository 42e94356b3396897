use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::UserRole;

/// Purpose of a signed token. Checked on verification so a reset token never opens a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    PasswordReset,
}

/// Payload of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}

/// Payload of a password-reset token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetClaims {
    pub id: Uuid,
    pub email: String,
    /// Fingerprint of the password hash the token was issued against.
    pub pwd: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
}
