use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::AppConfig;

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")
}
