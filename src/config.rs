use anyhow::{anyhow, Context};
use serde::Deserialize;
use time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(anyhow!("unknown APP_ENV {other:?}")),
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub reset_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    pub reset_ttl: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub env: Environment,
    pub cors_origins: Vec<String>,
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub server: ServerConfig,
}

/// Reset tokens always live one hour.
pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_connections = get("DATABASE_MAX_CONNECTIONS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?
            .unwrap_or(10);

        let secret = get("JWT_SECRET").context("JWT_SECRET must be set")?;
        let reset_secret = match get("JWT_RESET_SECRET") {
            Some(s) => s,
            None => {
                warn!("JWT_RESET_SECRET not set; reset tokens share the session secret");
                secret.clone()
            }
        };
        let ttl = parse_ttl(&get("JWT_EXPIRES_IN").unwrap_or_else(|| "7d".into()))
            .context("invalid JWT_EXPIRES_IN")?;

        let jwt = JwtConfig {
            secret,
            reset_secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "divein".into()),
            audience: get("JWT_AUDIENCE").unwrap_or_else(|| "divein-users".into()),
            ttl,
            reset_ttl: RESET_TOKEN_TTL,
        };

        let port = get("APP_PORT")
            .map(|v| v.parse::<u16>())
            .transpose()
            .context("APP_PORT must be a port number")?
            .unwrap_or(3001);
        let env = match get("APP_ENV") {
            Some(raw) => Environment::parse(&raw)?,
            None => Environment::Development,
        };
        let cors_origins = get("CORS_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:19006".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let server = ServerConfig {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            env,
            cors_origins,
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".into())
                .trim_end_matches('/')
                .to_string(),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            jwt,
            server,
        })
    }
}

/// Parses `"7d"`, `"12h"`, `"30m"`, `"45s"` or a bare number of seconds.
pub fn parse_ttl(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: i64 = digits
        .parse()
        .with_context(|| format!("expected a number in {raw:?}"))?;
    let ttl = match unit {
        "" | "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        other => anyhow::bail!("unknown duration unit {other:?}"),
    };
    if ttl.is_zero() {
        anyhow::bail!("duration must be positive");
    }
    Ok(ttl)
}
