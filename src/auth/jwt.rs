use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{
        claims::{ResetClaims, SessionClaims, TokenKind},
        password::credential_fingerprint,
        repo_types::{User, UserRole},
    },
    config::JwtConfig,
    state::AppState,
};

/// Signing and verification keys for session and password-reset tokens.
#[derive(Clone)]
pub struct JwtKeys {
    session_encoding: EncodingKey,
    session_decoding: DecodingKey,
    reset_encoding: EncodingKey,
    reset_decoding: DecodingKey,
    issuer: String,
    audience: String,
    session_ttl: Duration,
    reset_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            session_encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            session_decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            reset_encoding: EncodingKey::from_secret(cfg.reset_secret.as_bytes()),
            reset_decoding: DecodingKey::from_secret(cfg.reset_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: cfg.ttl,
            reset_ttl: cfg.reset_ttl,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    pub fn sign_session(&self, user: &User) -> anyhow::Result<String> {
        self.sign_session_for(user.id, &user.email, user.role)
    }

    pub fn sign_session_for(&self, id: Uuid, email: &str, role: UserRole) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            id,
            email: email.to_string(),
            role,
            iat: now.unix_timestamp(),
            exp: (now + self.session_ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Session,
        };
        let token = encode(&Header::default(), &claims, &self.session_encoding)?;
        debug!(user_id = %id, %role, "session token signed");
        Ok(token)
    }

    pub fn verify_session(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let claims: SessionClaims = self.decode_with(token, &self.session_decoding)?;
        if claims.kind != TokenKind::Session {
            anyhow::bail!("not a session token");
        }
        debug!(user_id = %claims.id, role = %claims.role, "session token verified");
        Ok(claims)
    }

    pub fn sign_reset(&self, user: &User) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = ResetClaims {
            id: user.id,
            email: user.email.clone(),
            pwd: credential_fingerprint(&user.password_hash)?,
            iat: now.unix_timestamp(),
            exp: (now + self.reset_ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::PasswordReset,
        };
        let token = encode(&Header::default(), &claims, &self.reset_encoding)?;
        debug!(user_id = %user.id, "reset token signed");
        Ok(token)
    }

    pub fn verify_reset(&self, token: &str) -> anyhow::Result<ResetClaims> {
        let claims: ResetClaims = self.decode_with(token, &self.reset_decoding)?;
        if claims.kind != TokenKind::PasswordReset {
            anyhow::bail!("not a reset token");
        }
        Ok(claims)
    }

    fn decode_with<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> anyhow::Result<T> {
        Ok(decode::<T>(token, key, &self.validation())?.claims)
    }
}
