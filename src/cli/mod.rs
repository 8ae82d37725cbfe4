//! Command-line surface.
//!
//! - `doctor`: probe prerequisites once and report
//! - `preset`: print a resolved guardrail bundle
//! - `provision`: headless provisioning from a TOML request file

pub mod doctor;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::bootstrap::save_bootstrap_env;
use crate::bridge::{LocalBridge, NativeBridge};
use crate::config::SetupRuntimeConfig;
use crate::setup::credentials::{CredentialDraft, CredentialKind};
use crate::setup::guardrails::{GuardrailBundle, GuardrailSelection, PresetResolver, SecurityPreset};
use crate::setup::orchestrator::{ProvisioningOrchestrator, ProvisioningPhase};
use crate::setup::prober::{Prerequisite, PrerequisiteProber, ProbeSnapshot};
use crate::setup::request::ConfigurationDraft;
use crate::setup::wallet::{BackupNotice, Chain, SharedWallet, WalletEntry, WalletProvisioner};
use crate::setup::wizard::mask_api_key;

pub use self::doctor::run_doctor_command;

#[derive(Parser, Debug)]
#[command(name = "nyx-setup")]
#[command(about = "Set up and provision the Nyx agent runtime", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the container engine, model runtime, and existing setup
    Doctor {
        /// Exit non-zero if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Print the guardrail bundle for a preset as JSON
    Preset {
        /// conservative, balanced, autonomous, or custom
        name: String,
    },

    /// Provision the agent from a request file
    Provision {
        /// TOML request file
        #[arg(long)]
        request: PathBuf,

        /// Keep polling until the container engine is running
        #[arg(long)]
        wait_docker: bool,
    },
}

/// Headless provisioning request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProvisionFile {
    pub agent: ConfigurationDraft,
    /// Keyed by credential field name, e.g. `anthropic_key`.
    pub credentials: BTreeMap<String, String>,
    pub guardrails: GuardrailSection,
    pub wallets: Vec<WalletImport>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GuardrailSection {
    pub preset: String,
    /// Only read when `preset = "custom"`.
    pub custom: Option<GuardrailBundle>,
}

impl Default for GuardrailSection {
    fn default() -> Self {
        Self {
            preset: SecurityPreset::Balanced.to_string(),
            custom: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WalletImport {
    pub chain: Chain,
    pub address: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ProvisionFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid request file {}", path.display()))
    }

    /// Build the credential draft, rejecting unknown field names.
    pub fn credential_draft(&self) -> anyhow::Result<CredentialDraft> {
        let mut draft = CredentialDraft::new();
        for (name, value) in &self.credentials {
            let kind = CredentialKind::from_field_name(name)
                .with_context(|| format!("unknown credential '{name}'"))?;
            draft.set(kind, value);
        }
        Ok(draft)
    }

    pub fn wallet_entries(&self) -> anyhow::Result<Vec<WalletEntry>> {
        self.wallets
            .iter()
            .map(|w| {
                let label = w.label.clone().unwrap_or_else(|| format!("{} wallet", w.chain));
                WalletEntry::import(w.chain, &w.address, label).map_err(Into::into)
            })
            .collect()
    }

    pub async fn guardrail_selection(
        &self,
        resolver: &PresetResolver,
    ) -> anyhow::Result<GuardrailSelection> {
        let mut selection = GuardrailSelection::default();
        resolver.apply_preset(&mut selection, &self.guardrails.preset).await?;
        if let Some(custom) = self.guardrails.custom
            && selection.preset() == SecurityPreset::Custom
        {
            selection.edit_custom(|bundle| *bundle = custom)?;
        }
        selection.validate()?;
        Ok(selection)
    }
}

/// Print a preset's bundle.
pub async fn run_preset_command(config: &SetupRuntimeConfig, name: &str) -> anyhow::Result<()> {
    let preset = SecurityPreset::parse(name)?;
    let bridge: Arc<dyn NativeBridge> = Arc::new(LocalBridge::new(config)?);
    let bundle = PresetResolver::new(bridge).resolve(preset).await;
    let output = serde_json::json!({ "preset": preset.as_str(), "bundle": bundle });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Provision from a request file.
pub async fn run_provision_command(
    config: &SetupRuntimeConfig,
    request_path: &Path,
    wait_docker: bool,
) -> anyhow::Result<()> {
    let file = ProvisionFile::load(request_path)?;
    let credentials = file.credential_draft()?;
    for (kind, field) in CredentialKind::ALL
        .into_iter()
        .filter_map(|kind| credentials.get(kind).map(|field| (kind, field)))
    {
        let status = if field.is_valid() { "ok" } else { "invalid" };
        let shown = field
            .validated()
            .map(|value| mask_api_key(value.expose_secret()))
            .unwrap_or_default();
        println!("  {:<16} {} {}", kind.field_name(), status, shown);
    }

    let bridge: Arc<dyn NativeBridge> = Arc::new(LocalBridge::new(config)?);
    let resolver = PresetResolver::new(Arc::clone(&bridge));
    let guardrails = file.guardrail_selection(&resolver).await?;

    let wallet = WalletProvisioner::shared();
    {
        let mut provisioner = wallet.lock().await;
        for entry in file.wallet_entries()? {
            provisioner.import(entry);
        }
    }

    let mut prober = PrerequisiteProber::new(Arc::clone(&bridge), config);
    let (engine, _) = prober.check_prerequisites().await;
    if !engine.is_running() {
        if !wait_docker {
            anyhow::bail!(
                "{}",
                engine
                    .hint
                    .unwrap_or_else(|| "Docker is not running".to_string())
            );
        }
        println!("Waiting for Docker...");
        let engine = wait_for(&mut prober, Prerequisite::ContainerEngine).await;
        if !engine.is_running() {
            anyhow::bail!(
                "{}",
                engine
                    .hint
                    .unwrap_or_else(|| "Docker did not start".to_string())
            );
        }
    }

    let orchestrator =
        ProvisioningOrchestrator::new(bridge, Arc::clone(&wallet), prober.prepull(), config);
    let progress = tokio::spawn(print_progress(orchestrator.subscribe()));

    let result = provision_with_backup(
        orchestrator.provision(&file.agent, &credentials, &guardrails),
        confirm_backup(orchestrator.subscribe(), Arc::clone(&wallet)),
    )
    .await;
    progress.abort();

    let active_address = result?;
    let home = config.home_dir.to_string_lossy();
    if let Err(e) = save_bootstrap_env(&[("NYX_HOME", home.as_ref())]) {
        tracing::warn!("Failed to save bootstrap env: {}", e);
    }

    println!();
    println!("Setup complete.");
    println!("  Active wallet: {active_address}");
    Ok(())
}

/// Drive provisioning while the backup confirmation runs alongside it.
///
/// A confirmation that fails (closed stdin, reveal error) ends the run
/// instead of leaving provisioning waiting for an acknowledgment.
async fn provision_with_backup(
    provision: impl Future<Output = Result<String, crate::Error>>,
    backup: impl Future<Output = anyhow::Result<()>>,
) -> anyhow::Result<String> {
    tokio::pin!(provision);
    tokio::pin!(backup);
    let mut acknowledged = false;
    loop {
        tokio::select! {
            result = &mut provision => return Ok(result?),
            outcome = &mut backup, if !acknowledged => {
                outcome.map_err(|e| e.context("Wallet backup was not confirmed"))?;
                acknowledged = true;
            }
        }
    }
}

/// Poll a prerequisite and wait for polling to settle.
async fn wait_for(prober: &mut PrerequisiteProber, dependency: Prerequisite) -> ProbeSnapshot {
    let mut rx = prober.subscribe(dependency);
    prober.start_polling(dependency);
    loop {
        {
            let snapshot = rx.borrow_and_update();
            if snapshot.is_running() || !snapshot.polling {
                return snapshot.clone();
            }
        }
        if rx.changed().await.is_err() {
            return prober.snapshot(dependency);
        }
    }
}

async fn print_progress(mut rx: tokio::sync::watch::Receiver<ProvisioningPhase>) {
    while rx.changed().await.is_ok() {
        let phase = rx.borrow_and_update().clone();
        match phase {
            ProvisioningPhase::GeneratingWallet => println!("Generating wallet..."),
            ProvisioningPhase::Committing { status } => println!("{status}"),
            _ => {}
        }
    }
}

/// Show the one-time backup notice and wait for the user to type `yes`.
async fn confirm_backup(
    mut rx: tokio::sync::watch::Receiver<ProvisioningPhase>,
    wallet: SharedWallet,
) -> anyhow::Result<()> {
    rx.wait_for(|phase| *phase == ProvisioningPhase::AwaitingBackupAck)
        .await?;
    let notice = wallet.lock().await.reveal_backup()?;
    print_backup_notice(&notice);
    drop(notice);

    loop {
        let line = tokio::task::spawn_blocking(|| {
            let mut editor = rustyline::DefaultEditor::new()?;
            editor.readline("Type 'yes' once the key is saved: ")
        })
        .await??;
        if line.trim().eq_ignore_ascii_case("yes") {
            break;
        }
    }
    wallet.lock().await.acknowledge_backup()?;
    println!("Backup acknowledged.");
    Ok(())
}

fn print_backup_notice(notice: &BackupNotice) {
    println!();
    println!("Wallet created");
    println!("  Address:     {}", notice.address);
    if let Some(public_key) = &notice.public_key {
        println!("  Public key:  {public_key}");
    }
    match &notice.secret_key {
        Some(secret) => {
            println!("  Private key: {}", secret.expose_secret());
            println!();
            println!("  This key is shown once. Store it somewhere safe now.");
        }
        None if notice.is_placeholder => {
            println!("  Placeholder wallet for development. It has no key to back up.");
        }
        None => {}
    }
    println!();
}
