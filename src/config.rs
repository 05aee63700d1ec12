use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub password_min_length: usize,
    pub reset_token_ttl_minutes: i64,
}

/// Passwords shorter than this are never accepted, whatever the environment says.
pub const MIN_PASSWORD_LENGTH_FLOOR: usize = 8;

impl CredentialConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.password_min_length >= MIN_PASSWORD_LENGTH_FLOOR,
            "PASSWORD_MIN_LENGTH must be at least {MIN_PASSWORD_LENGTH_FLOOR}"
        );
        anyhow::ensure!(
            self.reset_token_ttl_minutes > 0,
            "RESET_TOKEN_TTL_MINUTES must be positive"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Postgres URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub credentials: CredentialConfig,
    pub skill_sync_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let credentials = CredentialConfig {
            password_min_length: env_parse("PASSWORD_MIN_LENGTH").unwrap_or(8),
            reset_token_ttl_minutes: env_parse("RESET_TOKEN_TTL_MINUTES").unwrap_or(10),
        };
        credentials.validate()?;
        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            credentials,
            skill_sync_timeout_secs: env_parse("SKILL_SYNC_TIMEOUT_SECS").unwrap_or(5),
        })
    }

    pub fn skill_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.skill_sync_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            credentials: CredentialConfig {
                password_min_length: 8,
                reset_token_ttl_minutes: 10,
            },
            skill_sync_timeout_secs: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
