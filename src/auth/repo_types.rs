use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Capability tier carried by every account and every session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Traveler,
    Host,
}

impl UserRole {
    pub const ALL: &'static [UserRole] = &[UserRole::Traveler, UserRole::Host];

    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Traveler => "TRAVELER",
            UserRole::Host => "HOST",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRAVELER" => Ok(UserRole::Traveler),
            "HOST" => Ok(UserRole::Host),
            _ => Err(UnknownRole),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRole;

/// User record in the database. Not serializable: clients only see `PublicUser`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String, // Argon2 PHC string, never exposed
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
    pub role: UserRole,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row to insert; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub role: UserRole,
}

/// Partial profile update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_picture: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.profile_picture.is_none()
    }
}
