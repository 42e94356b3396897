use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{
    auth::{claims::SessionClaims, jwt::JwtKeys, repo_types::UserRole},
    error::AppError,
    state::AppState,
};

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(AppError::unauthorized)?;
    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(AppError::unauthorized)
}

fn verify_bearer(keys: &JwtKeys, headers: &HeaderMap) -> Result<SessionClaims, AppError> {
    let token = bearer_token(headers)?;
    keys.verify_session(token).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        AppError::Unauthorized("Token inválido o expirado".into())
    })
}

/// Verified session claims of the caller.
///
/// Reuses claims left in the request extensions by [`authorize`]; otherwise
/// verifies the `Authorization: Bearer` header itself.
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionClaims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<SessionClaims>() {
            return Ok(AuthUser(claims.clone()));
        }
        let keys = JwtKeys::from_ref(state);
        verify_bearer(&keys, &parts.headers).map(AuthUser)
    }
}

/// Allow-list of roles for a group of routes, used with [`authorize`].
#[derive(Clone)]
pub struct RoleGuard {
    keys: JwtKeys,
    allowed: &'static [UserRole],
}

impl RoleGuard {
    pub fn new(state: &AppState, allowed: &'static [UserRole]) -> Self {
        Self {
            keys: JwtKeys::from_ref(state),
            allowed,
        }
    }

    /// Any authenticated account.
    pub fn authenticated(state: &AppState) -> Self {
        Self::new(state, UserRole::ALL)
    }

    pub fn permits(&self, role: UserRole) -> bool {
        self.allowed.contains(&role)
    }
}

/// 401 without a valid session token, 403 when its role is not allowed.
pub async fn authorize(
    State(guard): State<RoleGuard>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = verify_bearer(&guard.keys, req.headers())?;
    if !guard.permits(claims.role) {
        warn!(user_id = %claims.id, role = %claims.role, "role not allowed");
        return Err(AppError::Forbidden(
            "No tienes permiso para acceder a este recurso".into(),
        ));
    }
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
