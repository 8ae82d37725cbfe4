//! Configuration commit.
//!
//! Every file is rendered in memory before anything touches disk, then each
//! one is written to a sibling temp file and renamed into place. A rendering
//! problem therefore leaves the previous configuration untouched. Once
//! written, the commit can still be rolled back to the prior files if the
//! agent fails to start.

use std::path::{Path, PathBuf};

use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::bootstrap::{AgentLayout, render_env_line};
use crate::bridge::keys::write_private;
use crate::error::BridgeError;
use crate::setup::credentials::LlmProvider;
use crate::setup::guardrails::GuardrailBundle;
use crate::setup::request::ProvisioningRequest;
use crate::setup::wallet::to_hex;

/// Gateway port inside the agent container.
pub const GATEWAY_PORT: u16 = 18789;

const HEARTBEAT_INTERVAL_MS: u64 = 4 * 60 * 60 * 1000;

/// Random 32-byte hex token for gateway auth.
pub fn generate_gateway_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// One rendered file waiting to be written.
#[derive(Debug)]
struct StagedFile {
    path: PathBuf,
    contents: String,
    private: bool,
}

/// What a path held before the commit replaced it.
#[derive(Debug)]
struct Replaced {
    path: PathBuf,
    previous: Option<Vec<u8>>,
    private: bool,
}

/// Files written by one commit, with enough of their prior state to undo it.
#[must_use = "a commit that fails later should be rolled back"]
#[derive(Debug)]
pub struct WrittenConfig {
    replaced: Vec<Replaced>,
}

impl WrittenConfig {
    /// Restore every written path to its state before the commit.
    pub fn roll_back(self) {
        for file in self.replaced.into_iter().rev() {
            let restored = match &file.previous {
                Some(bytes) if file.private => write_private(&file.path, bytes),
                Some(bytes) => std::fs::write(&file.path, bytes),
                None => std::fs::remove_file(&file.path),
            };
            if let Err(e) = restored {
                tracing::warn!(path = %file.path.display(), "Failed to roll back: {}", e);
            }
        }
        tracing::info!("Agent configuration rolled back");
    }
}

/// Writes the agent layout for a provisioning request.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    layout: AgentLayout,
    image: String,
}

impl ConfigWriter {
    pub fn new(layout: AgentLayout, image: impl Into<String>) -> Self {
        Self {
            layout,
            image: image.into(),
        }
    }

    pub fn layout(&self) -> &AgentLayout {
        &self.layout
    }

    /// Render and write the complete configuration.
    ///
    /// A failed write undoes the files already written before returning.
    pub fn write_all(
        &self,
        request: &ProvisioningRequest,
        gateway_token: &str,
    ) -> Result<WrittenConfig, BridgeError> {
        let mut staged = vec![
            StagedFile {
                path: self.layout.docker_env(),
                contents: render_docker_env(request, gateway_token, &self.image),
                private: true,
            },
            StagedFile {
                path: self.layout.guardrails_env(),
                contents: render_guardrails_env(&request.guardrails),
                private: true,
            },
            StagedFile {
                path: self.layout.cron_jobs(),
                contents: to_pretty(&render_cron_jobs(request))?,
                private: false,
            },
            StagedFile {
                path: self.layout.agent_config(),
                contents: to_pretty(&render_agent_config(request, gateway_token))?,
                private: true,
            },
        ];
        if !self.layout.compose_file().exists() {
            staged.push(StagedFile {
                path: self.layout.compose_file(),
                contents: render_compose_file(),
                private: false,
            });
        }
        let function_keys = self.layout.secrets_dir().join("function_call_keys.json");
        if !function_keys.exists() {
            staged.push(StagedFile {
                path: function_keys,
                contents: "{}".to_string(),
                private: true,
            });
        }

        self.create_directories()?;
        let mut written = WrittenConfig {
            replaced: Vec::with_capacity(staged.len()),
        };
        for file in &staged {
            let previous = std::fs::read(&file.path).ok();
            if let Err(e) = write_replacing(file) {
                written.roll_back();
                return Err(e);
            }
            written.replaced.push(Replaced {
                path: file.path.clone(),
                previous,
                private: file.private,
            });
        }
        tracing::info!(
            files = staged.len(),
            home = %self.layout.home().display(),
            "Agent configuration written"
        );
        Ok(written)
    }

    fn create_directories(&self) -> Result<(), BridgeError> {
        for dir in self.layout.directories() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BridgeError::Rejected(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                self.layout.secrets_dir(),
                std::fs::Permissions::from_mode(0o700),
            )?;
        }
        Ok(())
    }
}

fn to_pretty(value: &Value) -> Result<String, BridgeError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| BridgeError::Rejected(format!("Failed to serialize configuration: {e}")))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_replacing(file: &StagedFile) -> Result<(), BridgeError> {
    let tmp = file
        .path
        .with_file_name(format!(".{}.tmp", file_name(&file.path)));
    let written = if file.private {
        write_private(&tmp, file.contents.as_bytes())
    } else {
        std::fs::write(&tmp, &file.contents)
    };
    written
        .and_then(|()| std::fs::rename(&tmp, &file.path))
        .map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            BridgeError::Rejected(format!("Failed to write {}: {}", file_name(&file.path), e))
        })
}

/// Container environment: credentials, wallets, guardrails, and feature flags.
pub fn render_docker_env(
    request: &ProvisioningRequest,
    gateway_token: &str,
    image: &str,
) -> String {
    let mut out = String::from("# Nyx Docker Environment\n");
    out.push_str(&render_env_line("OPENCLAW_GATEWAY_TOKEN", gateway_token));
    out.push_str(&render_env_line("OPENCLAW_IMAGE", image));

    let keys = &request.provider_keys;
    let channels = &request.channel_credentials;
    for (key, secret) in [
        ("ANTHROPIC_API_KEY", &keys.anthropic),
        ("OPENAI_API_KEY", &keys.openai),
        ("VENICE_API_KEY", &keys.venice),
        ("NEARAI_API_KEY", &keys.nearai),
        ("PERPLEXITY_API_KEY", &keys.perplexity),
        ("TELEGRAM_BOT_TOKEN", &channels.telegram_token),
        ("SLACK_BOT_TOKEN", &channels.slack_token),
    ] {
        if let Some(secret) = secret {
            out.push_str(&render_env_line(key, secret.expose_secret()));
        }
    }

    out.push_str("\n# Wallets\n");
    out.push_str(&render_env_line(
        "WALLET_COUNT",
        &request.wallets.len().to_string(),
    ));
    for (i, wallet) in request.wallets.iter().enumerate() {
        let is_active = request.active_wallet_id.as_deref() == Some(wallet.id.as_str());
        out.push_str(&render_env_line(
            &format!("WALLET_{i}_CHAIN"),
            &wallet.chain.to_string(),
        ));
        out.push_str(&render_env_line(&format!("WALLET_{i}_ADDRESS"), &wallet.address));
        out.push_str(&render_env_line(&format!("WALLET_{i}_LABEL"), &wallet.label));
        out.push_str(&render_env_line(
            &format!("WALLET_{i}_ACTIVE"),
            &is_active.to_string(),
        ));
    }
    if let Some(active) = &request.active_wallet_id {
        out.push_str(&render_env_line("ACTIVE_WALLET_ID", active));
    }

    let caps = &request.capabilities;
    if caps.defi_crypto {
        let g = &request.guardrails;
        out.push_str("\n# DeFi guardrails\n");
        for (key, value) in [
            ("MAX_SINGLE_TX_USD", g.max_transaction_usd.to_string()),
            ("DAILY_LOSS_LIMIT_PCT", g.daily_loss_percent.to_string()),
            ("WEEKLY_LOSS_LIMIT_PCT", g.weekly_loss_percent.to_string()),
            ("MAX_CONCENTRATION_PCT", g.max_concentration_percent.to_string()),
            ("BURROW_MIN_HEALTH_FACTOR", g.min_health_factor.to_string()),
            ("MAX_SLIPPAGE_PCT", g.max_slippage_percent.to_string()),
            ("MAX_DAILY_TXS", g.daily_tx_limit.to_string()),
            ("REQUIRE_CONFIRMATION", g.require_confirmation.to_string()),
        ] {
            out.push_str(&render_env_line(key, &value));
        }
    }

    let m = &request.messaging;
    out.push_str("\n# Messaging\n");
    for (key, value) in [
        ("MESSAGING_GMAIL_ENABLED", m.gmail.enabled.to_string()),
        ("MESSAGING_GMAIL_AUTONOMY", m.gmail.autonomy.as_str().to_string()),
        ("MESSAGING_WHATSAPP_ENABLED", m.whatsapp.enabled.to_string()),
        ("MESSAGING_WHATSAPP_AUTONOMY", m.whatsapp.autonomy.as_str().to_string()),
        ("MESSAGING_TELEGRAM_ENABLED", m.telegram.enabled.to_string()),
        ("MESSAGING_TELEGRAM_AUTONOMY", m.telegram.autonomy.as_str().to_string()),
        ("MESSAGING_SLACK_ENABLED", m.slack.enabled.to_string()),
        ("MESSAGING_SLACK_AUTONOMY", m.slack.autonomy.as_str().to_string()),
        ("GOOGLE_AUTHENTICATED", request.google_authenticated.to_string()),
    ] {
        out.push_str(&render_env_line(key, &value));
    }

    out.push_str("\n# Capabilities\n");
    for (key, value) in [
        ("CAPABILITY_DEFI", caps.defi_crypto.to_string()),
        ("CAPABILITY_TRAVEL", caps.travel.to_string()),
        ("CAPABILITY_GOOGLE", caps.google_workspace.to_string()),
        ("CAPABILITY_EMAIL_INTEL", caps.email_intelligence.to_string()),
        ("CAPABILITY_COMMS", caps.communications.to_string()),
        ("CAPABILITY_SOURCE_INTEL", caps.source_intelligence.to_string()),
        ("DEFAULT_LLM_PROVIDER", request.default_provider.id().to_string()),
        (
            "OLLAMA_MODEL",
            request.ollama_model.clone().unwrap_or_default(),
        ),
    ] {
        out.push_str(&render_env_line(key, &value));
    }
    out
}

/// Guardrail limits as read by the external DeFi helper.
pub fn render_guardrails_env(g: &GuardrailBundle) -> String {
    let mut out = String::from("# Nyx DeFi Guardrails\n");
    for (key, value) in [
        ("MAX_TX_USD", g.max_transaction_usd.to_string()),
        ("DAILY_LOSS_PCT", g.daily_loss_percent.to_string()),
        ("WEEKLY_LOSS_PCT", g.weekly_loss_percent.to_string()),
        ("MAX_CONCENTRATION_PCT", g.max_concentration_percent.to_string()),
        ("BURROW_MIN_HEALTH", g.min_health_factor.to_string()),
        ("MAX_SLIPPAGE_PCT", g.max_slippage_percent.to_string()),
        ("MAX_DAILY_TXS", g.daily_tx_limit.to_string()),
        ("REQUIRE_CONFIRMATION", g.require_confirmation.to_string()),
    ] {
        out.push_str(&render_env_line(key, &value));
    }
    out
}

/// Scheduled jobs. Reports go to the highest-priority enabled channel.
pub fn render_cron_jobs(request: &ProvisioningRequest) -> Value {
    let email = &request.email;
    let tz = email.timezone.as_str();
    let delivery = json!({ "channel": request.messaging.delivery_channel() });
    let defi_enabled = request.capabilities.defi_crypto;
    let email_enabled = request.email_jobs_enabled();

    json!([
        {
            "id": "nyx-heartbeat",
            "name": format!("{} Heartbeat", request.agent_name),
            "schedule": { "intervalMs": HEARTBEAT_INTERVAL_MS },
            "prompt": "/opt/near-intents-helper/run_near_intents.sh heartbeat --risk medium",
            "delivery": delivery,
            "enabled": defi_enabled
        },
        {
            "id": "daily-defi-report",
            "name": "Daily DeFi Report",
            "schedule": { "cron": "0 9 * * *", "timezone": tz },
            "prompt": "/opt/near-intents-helper/run_near_intents.sh daily-report",
            "delivery": delivery,
            "enabled": defi_enabled
        },
        {
            "id": "hourly-email-triage",
            "name": "Hourly Email Triage",
            "schedule": {
                "cron": format!("0 {}-{} * * *", email.triage_start_hour, email.triage_end_hour),
                "timezone": tz
            },
            "prompt": "Quick email triage across all connected accounts. Search for unread emails in the last hour. Only message me if something is urgent.",
            "delivery": delivery,
            "enabled": email_enabled
        },
        {
            "id": "daily-email-digest",
            "name": "Daily Email Digest",
            "schedule": {
                "cron": format!("{} {} * * *", email.digest_minute, email.digest_hour),
                "timezone": tz
            },
            "prompt": "Generate the daily email digest across all connected accounts. Summarize the last 24 hours grouped by priority.",
            "delivery": delivery,
            "enabled": email_enabled
        }
    ])
}

/// Agent runtime configuration (`openclaw.json`).
pub fn render_agent_config(request: &ProvisioningRequest, gateway_token: &str) -> Value {
    let keys = &request.provider_keys;
    let channels = &request.channel_credentials;
    let caps = &request.capabilities;

    let mut providers = serde_json::Map::new();
    let configured = [
        (LlmProvider::Anthropic, keys.anthropic.is_some(), json!({ "model": "claude-sonnet-4-20250514" })),
        (LlmProvider::OpenAi, keys.openai.is_some(), json!({ "model": "gpt-4o" })),
        (
            LlmProvider::Venice,
            keys.venice.is_some(),
            json!({ "baseUrl": "https://api.venice.ai/api/v1", "model": "llama-3.3-70b" }),
        ),
        (
            LlmProvider::NearAi,
            keys.nearai.is_some(),
            json!({ "baseUrl": "https://cloud-api.near.ai/v1", "model": "qwen3-30b-a3b" }),
        ),
        (
            LlmProvider::Ollama,
            request.ollama_model.is_some(),
            json!({ "baseUrl": "http://host.docker.internal:11434", "model": request.ollama_model }),
        ),
    ];
    for (provider, enabled, mut settings) in configured {
        if enabled {
            settings["enabled"] = json!(true);
            providers.insert(provider.id().to_string(), settings);
        }
    }

    let whatsapp_allow_from = match &channels.whatsapp_phone {
        Some(phone) => json!([phone]),
        None => json!([]),
    };
    let mut channel_config = json!({
        "whatsapp": {
            "dmPolicy": "allowlist",
            "allowFrom": whatsapp_allow_from,
            "groupPolicy": "disabled",
            "textChunkLimit": 4000
        }
    });
    let mut plugins = json!({ "whatsapp": { "enabled": request.messaging.whatsapp.enabled } });
    if channels.telegram_token.is_some() {
        channel_config["telegram"] = json!({
            "dmPolicy": "pairing",
            "groupPolicy": "disabled",
            "textChunkLimit": 4000,
            "streamMode": "partial"
        });
        plugins["telegram"] = json!({ "enabled": request.messaging.telegram.enabled });
    }
    if channels.slack_token.is_some() {
        channel_config["slack"] = json!({
            "dmPolicy": "allowlist",
            "groupPolicy": "disabled",
            "textChunkLimit": 4000
        });
        plugins["slack"] = json!({ "enabled": request.messaging.slack.enabled });
    }

    let mut safe_bins = vec!["ls", "find", "wc", "date", "openclaw", "curl", "cat", "grep", "head", "tail"];
    if caps.google_workspace {
        safe_bins.push("gog");
    }
    if caps.defi_crypto {
        safe_bins.push("/opt/near-intents-helper/run_near_intents.sh");
    }

    let mut skills = serde_json::Map::new();
    if caps.defi_crypto {
        skills.insert("near-intents".to_string(), json!({ "enabled": true }));
    }
    if caps.travel {
        skills.insert("travel".to_string(), json!({ "enabled": true }));
    }

    json!({
        "agents": {
            "defaults": {
                "workspace": "/home/node/.openclaw/workspace",
                "maxConcurrent": 2,
                "sandbox": { "mode": "off" }
            },
            "list": [{
                "id": "default",
                "default": true,
                "workspace": "/home/node/.openclaw/workspace",
                "identity": {
                    "name": request.agent_name,
                    "theme": "private AI chief of staff"
                }
            }]
        },
        "llm": {
            "default": request.default_provider.id(),
            "providers": providers
        },
        "tools": {
            "profile": "coding",
            "deny": ["group:ui"],
            "media": { "audio": { "enabled": keys.openai.is_some() } },
            "exec": { "host": "gateway", "ask": "off", "safeBins": safe_bins }
        },
        "logging": {
            "level": "info",
            "redactSensitive": "tools",
            "redactPatterns": [
                "sk-ant-[A-Za-z0-9_\\-]+",
                "sk-proj-[A-Za-z0-9_\\-]+",
                "ed25519:[A-Za-z0-9]{40,}",
                "[0-9a-f]{64}"
            ]
        },
        "cron": { "enabled": true, "maxConcurrentRuns": 1 },
        "channels": channel_config,
        "gateway": {
            "port": GATEWAY_PORT,
            "mode": "local",
            "bind": "lan",
            "auth": { "mode": "token", "token": gateway_token },
            "controlUi": { "enabled": false }
        },
        "skills": {
            "load": { "extraDirs": ["/home/node/.openclaw/local-skills"], "watch": false },
            "entries": skills
        },
        "plugins": { "entries": plugins }
    })
}

/// Compose file used when none has been installed yet.
fn render_compose_file() -> String {
    format!(
        r#"services:
  openclaw-gateway:
    image: ${{OPENCLAW_IMAGE}}
    env_file: ./docker.env
    restart: unless-stopped
    ports:
      - "127.0.0.1:{port}:{port}"
    volumes:
      - ../.openclaw:/home/node/.openclaw
      - ./workspace:/home/node/.openclaw/workspace
"#,
        port = GATEWAY_PORT
    )
}
