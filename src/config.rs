//! Environment-driven server configuration.
//!
//! Recognized variables (all optional, falling back to the defaults below):
//! `PORT`, `HEARTBEAT_INTERVAL_MS`, `AUTH_TIMEOUT_MS`,
//! `MAX_CONNECTIONS_PER_ROOM`, `MAX_TOTAL_CONNECTIONS`, `MESSAGE_RATE_LIMIT`,
//! `IDENTITY_TRUST_ANCHOR_URL`, `CORS_ALLOWED_ORIGINS` (comma-separated, or
//! `*`), `NON_PRODUCTION`, `FLOOR_TTL_SECS`.
//!
//! A `.env` file in the working directory is loaded first, if present, so
//! local development doesn't require exporting variables by hand.

use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

fn default_port() -> u16 {
    8080
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_auth_timeout_ms() -> u64 {
    30_000
}
fn default_max_connections_per_room() -> usize {
    50
}
fn default_max_total_connections() -> usize {
    500
}
fn default_message_rate_limit() -> u32 {
    100
}
fn default_floor_ttl_secs() -> u64 {
    120
}
fn default_cors_allowed_origins() -> String {
    "*".to_string()
}
fn default_non_production() -> bool {
    false
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "default_max_connections_per_room")]
    pub max_connections_per_room: usize,
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_message_rate_limit")]
    pub message_rate_limit: u32,
    /// Absent means "no trust anchor configured"; combined with
    /// `non_production`, this selects the developer-bypass identity path.
    pub identity_trust_anchor_url: Option<String>,
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,
    #[serde(default = "default_non_production")]
    pub non_production: bool,
    #[serde(default = "default_floor_ttl_secs")]
    pub floor_ttl_secs: u64,
}

impl Settings {
    /// Loads settings from `.env` (if present) plus the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("loaded environment overrides from {}", path.display());
        }
        let raw = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?;
        raw.try_deserialize()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn floor_ttl(&self) -> Duration {
        Duration::from_secs(self.floor_ttl_secs)
    }

    /// `true` when the identity verifier should run in developer-bypass mode:
    /// non-production, and no trust anchor configured.
    pub fn skip_auth(&self) -> bool {
        self.non_production && self.identity_trust_anchor_url.is_none()
    }

    pub fn cors_origins(&self) -> Vec<String> {
        if self.cors_allowed_origins.trim() == "*" {
            return vec!["*".to_string()];
        }
        self.cors_allowed_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_auth_requires_both_non_production_and_no_anchor() {
        let mut settings = defaults();
        settings.non_production = true;
        settings.identity_trust_anchor_url = None;
        assert!(settings.skip_auth());

        settings.identity_trust_anchor_url = Some("https://idp.example.com".to_string());
        assert!(!settings.skip_auth());

        settings.identity_trust_anchor_url = None;
        settings.non_production = false;
        assert!(!settings.skip_auth());
    }

    #[test]
    fn cors_wildcard_is_not_split() {
        let settings = defaults();
        assert_eq!(settings.cors_origins(), vec!["*".to_string()]);
    }

    #[test]
    fn cors_list_is_split_and_trimmed() {
        let mut settings = defaults();
        settings.cors_allowed_origins = "https://a.example.com, https://b.example.com".to_string();
        assert_eq!(
            settings.cors_origins(),
            vec![
                "https://a.example.com".to_string(),
                "https://b.example.com".to_string()
            ]
        );
    }

    fn defaults() -> Settings {
        Settings {
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            auth_timeout_ms: default_auth_timeout_ms(),
            max_connections_per_room: default_max_connections_per_room(),
            max_total_connections: default_max_total_connections(),
            message_rate_limit: default_message_rate_limit(),
            identity_trust_anchor_url: None,
            cors_allowed_origins: default_cors_allowed_origins(),
            non_production: default_non_production(),
            floor_ttl_secs: default_floor_ttl_secs(),
        }
    }
}
