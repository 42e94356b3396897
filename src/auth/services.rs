use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::NewRegistration,
        claims::ResetClaims,
        password::{credential_fingerprint, hash_password, verify_password},
        repo::{RepoError, UserRepository},
        repo_types::{NewUser, ProfileChanges, User},
    },
    error::AppError,
    state::AppState,
};

const INVALID_CREDENTIALS: &str = "Credenciales inválidas";
const EMAIL_TAKEN: &str = "El email ya está registrado";
const RESET_TOKEN_INVALID: &str = "Token inválido o expirado";

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::DuplicateEmail => AppError::Conflict(EMAIL_TAKEN.into()),
            RepoError::Database(e) => AppError::Internal(anyhow::Error::new(e).context("user store")),
        }
    }
}

/// Account operations over an injected user store.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.users.clone())
    }
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    #[instrument(skip(self, input), fields(email = %input.email, role = %input.role))]
    pub async fn register(&self, input: NewRegistration) -> Result<User, AppError> {
        if self.users.find_by_email(&input.email).await?.is_some() {
            warn!("email already registered");
            return Err(AppError::Conflict(EMAIL_TAKEN.into()));
        }

        let password_hash = hash_password(&input.password).await?;
        // A concurrent insert of the same email is caught by the unique index
        // and comes back as RepoError::DuplicateEmail.
        let user = self
            .users
            .create(NewUser {
                name: input.name,
                email: input.email,
                password_hash,
                phone: input.phone,
                role: input.role,
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AppError> {
        let Some(user) = self.users.find_by_email(email).await? else {
            warn!("login unknown email");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        };

        if !verify_password(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<User, AppError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::user_not_found(id))
    }

    /// Lookup for the forgot-password flow; absence is not an error.
    pub async fn find_for_reset(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.find_by_email(email).await?)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<User, AppError> {
        if changes.is_empty() {
            return self.get_user_by_id(id).await;
        }
        let user = self
            .users
            .update_profile(id, changes)
            .await?
            .ok_or_else(|| AppError::user_not_found(id))?;
        info!(user_id = %id, "profile updated");
        Ok(user)
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        let user = self.get_user_by_id(id).await?;

        if !verify_password(current_password, &user.password_hash).await? {
            warn!(user_id = %id, "change password with wrong current password");
            return Err(AppError::Unauthorized("Contraseña actual incorrecta".into()));
        }

        self.store_password(id, new_password).await?;
        info!(user_id = %id, "password changed");
        Ok(())
    }

    /// Sets a new password for a user who proved ownership with a reset token.
    /// The token is bound to the email and password hash it was issued for, so
    /// it stops working once any password change lands.
    #[instrument(skip_all, fields(user_id = %claims.id))]
    pub async fn reset_password(&self, claims: &ResetClaims, new_password: &str) -> Result<(), AppError> {
        let id = claims.id;
        let user = self.get_user_by_id(id).await?;
        if user.email != claims.email {
            warn!("reset token issued for a previous email");
            return Err(AppError::Unauthorized(RESET_TOKEN_INVALID.into()));
        }
        if credential_fingerprint(&user.password_hash)? != claims.pwd {
            warn!("reset token issued for a previous password");
            return Err(AppError::Unauthorized(RESET_TOKEN_INVALID.into()));
        }
        self.store_password(id, new_password).await?;
        info!(user_id = %id, "password reset");
        Ok(())
    }

    async fn store_password(&self, id: Uuid, new_password: &str) -> Result<(), AppError> {
        let hash = hash_password(new_password).await?;
        if !self.users.update_password(id, &hash).await? {
            return Err(AppError::user_not_found(id));
        }
        Ok(())
    }
}
