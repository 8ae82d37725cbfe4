//! Bootstrap helpers and on-disk layout.
//!
//! Bootstrap env vars live in `~/.nyx/.env` (standard dotenvy format) and are
//! loaded before [`SetupRuntimeConfig`](crate::config::SetupRuntimeConfig) is
//! resolved. The agent layout under the user's home (`openclaw/` and
//! `.openclaw/`) belongs to the native bridge; this module only names paths.

use std::path::{Path, PathBuf};

/// Path to the setup-specific `.env` file: `~/.nyx/.env`.
pub fn nyx_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nyx")
        .join(".env")
}

/// Load env vars from `~/.nyx/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that `./.env` wins. dotenvy
/// never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.nyx/.env`
pub fn load_nyx_env() {
    let path = nyx_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

/// Write bootstrap vars to `~/.nyx/.env`, replacing the file.
pub fn save_bootstrap_env(vars: &[(&str, &str)]) -> std::io::Result<()> {
    save_bootstrap_env_to(&nyx_env_path(), vars)
}

pub(crate) fn save_bootstrap_env_to(path: &Path, vars: &[(&str, &str)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for (key, value) in vars {
        content.push_str(&render_env_line(key, value));
    }
    std::fs::write(path, content)
}

/// Render one `KEY="value"` line.
///
/// Backslashes and double quotes are escaped so a value cannot break out of
/// its quotes and inject another variable.
pub(crate) fn render_env_line(key: &str, value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("{key}=\"{escaped}\"\n")
}

/// Paths of the agent layout rooted at a home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLayout {
    home: PathBuf,
}

impl AgentLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.home.join("openclaw")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home.join(".openclaw")
    }

    pub fn docker_env(&self) -> PathBuf {
        self.runtime_dir().join("docker.env")
    }

    pub fn compose_file(&self) -> PathBuf {
        self.runtime_dir().join("docker-compose.yml")
    }

    pub fn agent_config(&self) -> PathBuf {
        self.state_dir().join("openclaw.json")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.state_dir().join("secrets")
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.secrets_dir().join("wallets")
    }

    pub fn guardrails_env(&self) -> PathBuf {
        self.secrets_dir().join("defi_guardrails.env")
    }

    pub fn cron_jobs(&self) -> PathBuf {
        self.state_dir().join("cron").join("jobs.json")
    }

    /// Directories the commit creates before writing any file.
    pub fn directories(&self) -> Vec<PathBuf> {
        vec![
            self.runtime_dir().join("workspace"),
            self.runtime_dir().join("bin"),
            self.secrets_dir(),
            self.wallets_dir(),
            self.state_dir().join("cron"),
            self.state_dir().join("defi-state").join("logs"),
            self.state_dir().join("agents").join("default").join("sessions"),
        ]
    }

    /// Setup is complete once both the agent config and the container env exist.
    pub fn is_setup_complete(&self) -> bool {
        self.agent_config().exists() && self.docker_env().exists()
    }
}
