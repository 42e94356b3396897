use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::repo_types::{ProfileChanges, User, UserRole},
    error::AppError,
    extract::Validate,
};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MIN_NAME_LEN: usize = 2;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn invalid(msg: &str) -> AppError {
    AppError::Validation(msg.to_string())
}

fn check_email(email: &str) -> Result<(), AppError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(invalid("Email inválido"))
    }
}

fn check_name(name: &str) -> Result<(), AppError> {
    if name.trim().chars().count() < MIN_NAME_LEN {
        return Err(invalid("El nombre debe tener al menos 2 caracteres"));
    }
    Ok(())
}

fn check_new_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid("La contraseña debe tener al menos 6 caracteres"));
    }
    Ok(())
}

// --- requests ---

/// Body of `POST /auth/register` and `POST /auth/signup`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<String>,
    pub phone: Option<String>,
}

/// A registration that passed validation.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    pub phone: Option<String>,
}

impl Validate for RegisterRequest {
    type Output = NewRegistration;

    fn validate(self) -> Result<NewRegistration, AppError> {
        if self.name.is_empty() || self.email.is_empty() || self.password.is_empty() {
            return Err(invalid("Nombre, email y contraseña son obligatorios"));
        }
        check_name(&self.name)?;
        check_email(&self.email)?;
        check_new_password(&self.password)?;
        let role = match self.role.as_deref() {
            None => UserRole::Traveler,
            Some(raw) => raw.parse().map_err(|_| invalid("Rol inválido"))?,
        };
        Ok(NewRegistration {
            name: self.name.trim().to_string(),
            email: self.email,
            password: self.password,
            role,
            phone: self.phone.filter(|p| !p.trim().is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Validate for LoginRequest {
    type Output = Self;

    fn validate(self) -> Result<Self, AppError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(invalid("Email y contraseña son obligatorios"));
        }
        check_email(&self.email)?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

impl Validate for ForgotPasswordRequest {
    type Output = Self;

    fn validate(self) -> Result<Self, AppError> {
        check_email(&self.email)?;
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password: String,
}

impl Validate for ResetPasswordRequest {
    type Output = Self;

    fn validate(self) -> Result<Self, AppError> {
        if self.token.is_empty() || self.new_password.is_empty() {
            return Err(invalid("Token y nueva contraseña son obligatorios"));
        }
        check_new_password(&self.new_password)?;
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
}

impl Validate for UpdateProfileRequest {
    type Output = ProfileChanges;

    fn validate(self) -> Result<ProfileChanges, AppError> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(url) = &self.profile_picture {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(invalid("La foto de perfil debe ser una URL"));
            }
        }
        Ok(ProfileChanges {
            name: self.name.map(|n| n.trim().to_string()),
            phone: self.phone,
            profile_picture: self.profile_picture,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    type Output = Self;

    fn validate(self) -> Result<Self, AppError> {
        if self.current_password.is_empty() || self.new_password.is_empty() {
            return Err(invalid("Contraseña actual y nueva son obligatorias"));
        }
        check_new_password(&self.new_password)
            .map_err(|_| invalid("La nueva contraseña debe tener al menos 6 caracteres"))?;
        Ok(self)
    }
}

// --- responses ---

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn with_message(message: &'static str, data: T) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: &'static str) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthData {
    pub user: PublicUser,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            phone: u.phone,
            profile_picture: u.profile_picture,
            role: u.role,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}
