use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, ProfileChanges, User};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::DuplicateEmail,
            _ => RepoError::Database(e),
        }
    }
}

/// Persistence port for user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RepoError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError>;
    /// Returns `None` when no row matched.
    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, RepoError>;
    /// Returns `false` when no row matched.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, RepoError>;
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, phone, profile_picture, role, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepoError> {
        let sql = format!(
            r#"
            INSERT INTO users (name, email, password_hash, phone, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.phone)
            .bind(user.role)
            .fetch_one(&self.db)
            .await?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<User>, RepoError> {
        let sql = format!(
            r#"
            UPDATE users
               SET name            = COALESCE($2, name),
                   phone           = COALESCE($3, phone),
                   profile_picture = COALESCE($4, profile_picture),
                   updated_at      = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.name)
            .bind(changes.phone)
            .bind(changes.profile_picture)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, RepoError> {
        let done = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2,
                   updated_at    = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}
