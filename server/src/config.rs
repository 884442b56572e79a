//! Configuration management for the server.

use std::env;
use std::time::Duration;
use tally_engine::{MergePolicy, ReconcilePolicy, TieBreak};
use tally_session::{RetryPolicy, SessionConfig};

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Base URL of the system of record
    pub remote_api_url: String,
    /// Bearer credential forwarded to the system of record
    pub remote_api_token: Option<String>,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Attempts per remote round-trip
    pub max_retries: u32,
    /// Upper bound on one sync's poll loop
    pub poll_budget: Duration,
    /// Fields `merge` takes from local data
    pub merge_override_fields: Vec<String>,
    pub tie_break: TieBreak,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;
        let remote_api_url = lookup("REMOTE_API_URL")
            .ok_or(ConfigError::MissingRemoteApiUrl)?
            .trim_end_matches('/')
            .to_string();
        let remote_api_token = lookup("REMOTE_API_TOKEN").filter(|t| !t.is_empty());

        let poll_interval = Duration::from_millis(parse_or(&lookup, "POLL_INTERVAL_MS", 500)?);
        let max_retries = parse_or(&lookup, "MAX_RETRIES", 3)?;
        let poll_budget = Duration::from_secs(parse_or(&lookup, "POLL_BUDGET_SECS", 600)?);

        let merge_override_fields = match lookup("MERGE_OVERRIDE_FIELDS") {
            Some(fields) => fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
            None => MergePolicy::default().override_fields,
        };

        let tie_break = match lookup("TIE_BREAK").as_deref().map(str::trim) {
            None | Some("") | Some("positional") => TieBreak::Positional,
            Some("closest") => TieBreak::ClosestMatch,
            Some(other) => return Err(ConfigError::InvalidTieBreak(other.to_string())),
        };

        Ok(Self {
            host,
            port,
            database_url,
            remote_api_url,
            remote_api_token,
            poll_interval,
            max_retries,
            poll_budget,
            merge_override_fields,
            tie_break,
        })
    }

    /// Session manager settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        let policy = ReconcilePolicy {
            merge: MergePolicy::new(self.merge_override_fields.iter().cloned()),
            tie_break: self.tie_break,
            ..Default::default()
        };

        SessionConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_poll_budget(self.poll_budget)
            .with_retry(RetryPolicy {
                max_attempts: self.max_retries.max(1),
                ..Default::default()
            })
            .with_policy(policy)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(key)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("REMOTE_API_URL environment variable is required")]
    MissingRemoteApiUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),

    #[error("Invalid TIE_BREAK value: {0} (expected positional or closest)")]
    InvalidTieBreak(String),
}
