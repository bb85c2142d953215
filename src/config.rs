//! Runtime configuration.
//!
//! Credentials come from `LITTLEBITS_ACCESS_TOKEN` / `LITTLEBITS_DEVICE_ID`,
//! or, when those are not set, from a `tokens.json` file:
//!
//! ```json
//! { "access_token": "...", "device_id": "00e04c1efff8" }
//! ```
//!
//! # Tokens file location
//!
//! Tries, in order:
//! 1. `$TOKENS_FILE` if set
//! 2. `config/tokens.json` relative to the working directory
//! 3. `$XDG_CONFIG_HOME/littlebits-relay/tokens.json`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

const DEFAULT_API_URL: &str = "https://api-http.littlebitscloud.cc";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLISHER_EVENTS: &str = "amplitude:delta:ignite";

/// Shape of `tokens.json`.
#[derive(Deserialize, Debug, Clone)]
pub struct Tokens {
    pub access_token: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub access_token: String,
    pub device_id: String,
    /// Hub REST API base, without trailing slash.
    pub api_url: String,
    /// Callback URL the hub posts device events to.
    pub subscriber_url: String,
    pub publisher_events: Vec<String>,
    pub database_url: Option<String>,
    pub selection_seed: Option<u64>,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tokens = match (
            env_opt("LITTLEBITS_ACCESS_TOKEN"),
            env_opt("LITTLEBITS_DEVICE_ID"),
        ) {
            (Some(access_token), Some(device_id)) => Tokens {
                access_token,
                device_id,
            },
            _ => {
                let path = resolve_tokens_path().context(
                    "LITTLEBITS_ACCESS_TOKEN and LITTLEBITS_DEVICE_ID must be set when no tokens.json is present",
                )?;
                load_tokens(&path)?
            }
        };

        let base_url = env_opt("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let subscriber_url = env_opt("SUBSCRIBER_URL")
            .unwrap_or_else(|| format!("{}/events", base_url.trim_end_matches('/')));

        let selection_seed = env_opt("SELECTION_SEED")
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("SELECTION_SEED must be an unsigned integer")?;

        let config = Self {
            access_token: tokens.access_token,
            device_id: tokens.device_id,
            api_url: env_opt("LITTLEBITS_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.into())
                .trim_end_matches('/')
                .to_string(),
            subscriber_url,
            publisher_events: parse_events(
                &env_opt("PUBLISHER_EVENTS").unwrap_or_else(|| DEFAULT_PUBLISHER_EVENTS.into()),
            ),
            database_url: env_opt("DATABASE_URL"),
            selection_seed,
            bind_addr: env_opt("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        };

        info!(
            device_id = %config.device_id,
            api_url = %config.api_url,
            subscriber_url = %config.subscriber_url,
            "Configuration loaded"
        );

        Ok(config)
    }
}

/// Read a `tokens.json` file.
pub fn load_tokens(path: &Path) -> Result<Tokens> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let tokens: Tokens = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    info!(path = %path.display(), "Loaded tokens file");
    Ok(tokens)
}

fn resolve_tokens_path() -> Option<PathBuf> {
    if let Some(path) = env_opt("TOKENS_FILE") {
        return Some(PathBuf::from(path));
    }

    let local = PathBuf::from("config/tokens.json");
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("littlebits-relay").join("tokens.json"))
        .filter(|p| p.is_file())
}

fn parse_events(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Env var lookup treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
impl Config {
    /// Config pointing at a fake hub, for handler tests.
    pub fn for_tests(api_url: &str) -> Self {
        Self {
            access_token: "test-token".into(),
            device_id: "00e04c1efff8".into(),
            api_url: api_url.into(),
            subscriber_url: "http://relay.test/events".into(),
            publisher_events: vec![DEFAULT_PUBLISHER_EVENTS.into()],
            database_url: None,
            selection_seed: Some(7),
            bind_addr: "127.0.0.1:0".into(),
        }
    }
}
