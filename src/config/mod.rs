//! Runtime configuration for the setup flow.
//!
//! Values are loaded with priority: env var > `./.env` > `~/.nyx/.env` > default.
//! Nothing here is persisted by this crate; the native bridge owns the agent's
//! durable configuration.

pub(crate) mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

use self::helpers::{optional_env, parse_bool_env, parse_millis_env, parse_positive_env};

/// Agent runtime image pulled during provisioning.
pub const DEFAULT_AGENT_IMAGE: &str = "ghcr.io/openclaw/openclaw:2026.2.17";

/// Local-model runtime endpoint.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Fixed-interval, bounded-attempt polling policy for one prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Configuration for the setup/provisioning flow.
#[derive(Debug, Clone)]
pub struct SetupRuntimeConfig {
    /// Poll policy used while waiting for the container engine.
    pub docker_poll: PollPolicy,
    /// Poll policy used while waiting for the local-model runtime.
    pub ollama_poll: PollPolicy,
    /// Tick used while waiting for the user to acknowledge the wallet backup.
    pub backup_ack_poll: Duration,
    /// Tick used to refresh coarse status text during the commit call.
    pub status_refresh: Duration,
    pub agent_image: String,
    pub ollama_base_url: String,
    /// Whether a failed keypair generation may fall back to a placeholder wallet.
    pub dev_wallet_fallback: bool,
    /// Root under which `openclaw/` and `.openclaw/` live.
    pub home_dir: PathBuf,
}

impl Default for SetupRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_poll: PollPolicy::new(Duration::from_secs(3), 30),
            ollama_poll: PollPolicy::new(Duration::from_secs(3), 20),
            backup_ack_poll: Duration::from_millis(500),
            status_refresh: Duration::from_secs(1),
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            dev_wallet_fallback: cfg!(debug_assertions),
            home_dir: default_home_dir(),
        }
    }
}

impl SetupRuntimeConfig {
    /// Load configuration from env files and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_nyx_env();
        Self::resolve()
    }

    /// Resolve from the current process environment without touching env files.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let docker_poll = PollPolicy::new(
            parse_millis_env("NYX_DOCKER_POLL_INTERVAL_MS", 3_000)?,
            parse_positive_env("NYX_DOCKER_POLL_ATTEMPTS", defaults.docker_poll.max_attempts)?,
        );
        let ollama_poll = PollPolicy::new(
            parse_millis_env("NYX_OLLAMA_POLL_INTERVAL_MS", 3_000)?,
            parse_positive_env("NYX_OLLAMA_POLL_ATTEMPTS", defaults.ollama_poll.max_attempts)?,
        );

        let ollama_base_url = optional_env("OLLAMA_BASE_URL")?
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.ollama_base_url);
        if !(ollama_base_url.starts_with("http://") || ollama_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "OLLAMA_BASE_URL".to_string(),
                message: format!("expected an http(s) URL, got '{ollama_base_url}'"),
            });
        }

        let home_dir = optional_env("NYX_HOME")?
            .map(PathBuf::from)
            .unwrap_or(defaults.home_dir);

        Ok(Self {
            docker_poll,
            ollama_poll,
            backup_ack_poll: parse_millis_env("NYX_BACKUP_ACK_POLL_MS", 500)?,
            status_refresh: parse_millis_env("NYX_STATUS_REFRESH_MS", 1_000)?,
            agent_image: optional_env("NYX_AGENT_IMAGE")?.unwrap_or(defaults.agent_image),
            ollama_base_url,
            dev_wallet_fallback: parse_bool_env(
                "NYX_DEV_WALLET_FALLBACK",
                defaults.dev_wallet_fallback,
            )?,
            home_dir,
        })
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
