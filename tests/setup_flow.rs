//! End-to-end setup flow scenarios against an in-memory bridge.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use nyx_setup::bridge::keys::generate_near_keypair;
use nyx_setup::bridge::{ContainerEngineStatus, GeneratedWallet, ModelRuntimeStatus, NativeBridge};
use nyx_setup::config::{PollPolicy, SetupRuntimeConfig};
use nyx_setup::error::{BridgeError, RecoveryAction, ValidationError, WalletError};
use nyx_setup::setup::guardrails::{GuardrailBundle, GuardrailSelection, fallback_bundle};
use nyx_setup::setup::wallet::generate_wallet;
use nyx_setup::setup::wizard::StepBlocked;
use nyx_setup::setup::{
    Chain, CredentialKind, PasteOutcome, PrepullState, Prerequisite, PrerequisiteProber,
    PrerequisiteStatus, PresetResolver, ProvisioningOrchestrator, ProvisioningPhase,
    ProvisioningRequest, SecurityPreset, SetupWizard, WalletEntry, WalletPhase,
    WalletProvisioner, WizardStep,
};

const ANTHROPIC: &str = "sk-ant-REDACTED";

#[derive(Debug, Clone)]
struct CommitRecord {
    agent_name: String,
    wallet_addresses: Vec<String>,
    has_anthropic: bool,
    preset: SecurityPreset,
}

#[derive(Default)]
struct FakeBridge {
    engine: Mutex<ContainerEngineStatus>,
    engine_checks: AtomicU32,
    install_engine_error: Option<String>,
    keygen_fails: bool,
    commit_error: Option<String>,
    commits: Mutex<Vec<CommitRecord>>,
    prepulls: AtomicU32,
    preset_calls: AtomicU32,
    /// Nudge each resolved bundle so repeated bridge calls would differ.
    drifting_presets: bool,
    preset_backend_down: bool,
    /// Return bundles whose daily loss limit exceeds the weekly one.
    inconsistent_presets: bool,
}

impl FakeBridge {
    fn with_engine(installed: bool, running: bool) -> Self {
        Self {
            engine: Mutex::new(ContainerEngineStatus {
                installed,
                running,
                version: installed.then(|| "Docker version 27.0.3".to_string()),
                download_url: (!installed).then(|| "https://example.test/Docker.dmg".to_string()),
            }),
            ..Default::default()
        }
    }

    fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl NativeBridge for FakeBridge {
    async fn check_container_engine(&self) -> Result<ContainerEngineStatus, BridgeError> {
        self.engine_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.engine.lock().unwrap().clone())
    }

    async fn install_container_engine(&self) -> Result<String, BridgeError> {
        match &self.install_engine_error {
            Some(message) => Err(BridgeError::Rejected(message.clone())),
            None => Ok("Docker Desktop installed. Waiting for it to start...".to_string()),
        }
    }

    async fn check_model_runtime(&self) -> Result<ModelRuntimeStatus, BridgeError> {
        Ok(ModelRuntimeStatus::default())
    }

    async fn install_model_runtime(&self) -> Result<String, BridgeError> {
        Err(BridgeError::Rejected("not supported here".to_string()))
    }

    async fn prepull_image(&self) -> Result<(), BridgeError> {
        self.prepulls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn generate_keypair(&self) -> Result<GeneratedWallet, BridgeError> {
        if self.keygen_fails {
            return Err(BridgeError::Rejected("keychain unavailable".to_string()));
        }
        Ok(generate_near_keypair())
    }

    async fn resolve_guardrail_preset(
        &self,
        preset: SecurityPreset,
    ) -> Result<GuardrailBundle, BridgeError> {
        let call = self.preset_calls.fetch_add(1, Ordering::SeqCst);
        if self.preset_backend_down {
            return Err(BridgeError::Rejected("preset service unavailable".to_string()));
        }
        let mut bundle = fallback_bundle(preset);
        if self.inconsistent_presets {
            bundle.daily_loss_percent = bundle.weekly_loss_percent + 1.0;
        }
        if self.drifting_presets {
            bundle.max_transaction_usd += f64::from(call + 1);
        }
        Ok(bundle)
    }

    async fn commit(&self, request: &ProvisioningRequest) -> Result<String, BridgeError> {
        self.commits.lock().unwrap().push(CommitRecord {
            agent_name: request.agent_name.clone(),
            wallet_addresses: request.wallets.iter().map(|w| w.address.clone()).collect(),
            has_anthropic: request.provider_keys.anthropic.is_some(),
            preset: request.guardrail_preset,
        });
        if let Some(message) = &self.commit_error {
            return Err(BridgeError::Rejected(message.clone()));
        }
        Ok(request
            .active_wallet()
            .map(|w| w.address.clone())
            .unwrap_or_else(|| "setup_complete".to_string()))
    }

    async fn is_setup_complete(&self) -> Result<bool, BridgeError> {
        Ok(!self.commits.lock().unwrap().is_empty())
    }
}

fn test_config() -> SetupRuntimeConfig {
    SetupRuntimeConfig {
        docker_poll: PollPolicy::new(Duration::from_secs(3), 30),
        ollama_poll: PollPolicy::new(Duration::from_secs(3), 20),
        backup_ack_poll: Duration::from_millis(10),
        status_refresh: Duration::from_millis(50),
        dev_wallet_fallback: false,
        ..Default::default()
    }
}

async fn wallet_ready_wizard(wallet_address: &str) -> SetupWizard {
    let mut wizard = SetupWizard::new(WalletProvisioner::shared());
    wizard.credentials.set(CredentialKind::AnthropicKey, ANTHROPIC);
    wizard.config.agent_name = "Atlas".to_string();
    let entry = WalletEntry::import(Chain::Near, wallet_address, "Main").unwrap();
    wizard.wallet().lock().await.import(entry);
    wizard
}

// ── Scenario A: guardrail presets ───────────────────────────────

#[tokio::test]
async fn balanced_preset_yields_the_balanced_bundle() {
    let resolver = PresetResolver::new(Arc::new(FakeBridge::default()));
    let mut selection = GuardrailSelection::default();
    resolver.apply_preset(&mut selection, "conservative").await.unwrap();
    resolver.apply_preset(&mut selection, "Balanced").await.unwrap();

    assert_eq!(selection.preset(), SecurityPreset::Balanced);
    assert_eq!(
        *selection.bundle(),
        GuardrailBundle {
            max_transaction_usd: 500.0,
            daily_loss_percent: 5.0,
            weekly_loss_percent: 15.0,
            daily_tx_limit: 20,
            require_confirmation: false,
            max_slippage_percent: 2.0,
            max_concentration_percent: 40.0,
            min_health_factor: 1.5,
        }
    );
}

#[tokio::test]
async fn preset_application_is_deterministic_regardless_of_prior_state() {
    let bridge = Arc::new(FakeBridge {
        drifting_presets: true,
        ..Default::default()
    });
    let resolver = PresetResolver::new(bridge.clone());

    let mut first = GuardrailSelection::default();
    resolver.apply_preset(&mut first, "conservative").await.unwrap();

    let mut second = GuardrailSelection::default();
    resolver.apply_preset(&mut second, "autonomous").await.unwrap();
    second.freeze_as_custom();
    second.edit_custom(|b| b.daily_tx_limit = 7).unwrap();
    resolver.apply_preset(&mut second, "conservative").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(bridge.preset_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_preset_names_are_rejected_locally() {
    let bridge = Arc::new(FakeBridge::default());
    let resolver = PresetResolver::new(bridge.clone());
    let mut selection = GuardrailSelection::default();

    let err = resolver.apply_preset(&mut selection, "yolo").await.unwrap_err();
    assert_eq!(err, ValidationError::UnknownPreset("yolo".to_string()));
    assert_eq!(selection, GuardrailSelection::default());
    assert_eq!(bridge.preset_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_preset_backend_falls_back_silently() {
    let bridge = Arc::new(FakeBridge {
        preset_backend_down: true,
        ..Default::default()
    });
    let resolver = PresetResolver::new(bridge.clone());

    for preset in [
        SecurityPreset::Conservative,
        SecurityPreset::Balanced,
        SecurityPreset::Autonomous,
    ] {
        let mut selection = GuardrailSelection::default();
        resolver
            .apply_preset(&mut selection, &preset.to_string())
            .await
            .unwrap();
        assert_eq!(selection.preset(), preset);
        assert_eq!(*selection.bundle(), fallback_bundle(preset));
    }
    assert_eq!(bridge.preset_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn inconsistent_bundle_from_the_backend_is_replaced_by_the_fallback() {
    let bridge = Arc::new(FakeBridge {
        inconsistent_presets: true,
        ..Default::default()
    });
    let resolver = PresetResolver::new(bridge.clone());

    let bundle = resolver.resolve(SecurityPreset::Balanced).await;
    assert_eq!(bundle, fallback_bundle(SecurityPreset::Balanced));
    assert!(bundle.validate().is_ok());

    // The fallback is remembered; the backend is not asked again.
    resolver.resolve(SecurityPreset::Balanced).await;
    assert_eq!(bridge.preset_calls.load(Ordering::SeqCst), 1);
}

// ── Scenario B: credential paste routing ───────────────────────

#[test]
fn anthropic_paste_routes_from_any_focused_field() {
    for focused in [
        CredentialKind::TelegramToken,
        CredentialKind::VeniceKey,
        CredentialKind::WhatsAppPhone,
    ] {
        let mut wizard = SetupWizard::default();
        let outcome = wizard.credentials.route_paste(focused, ANTHROPIC);
        assert_eq!(outcome, PasteOutcome::Routed(CredentialKind::AnthropicKey));

        let field = wizard.credentials.get(CredentialKind::AnthropicKey).unwrap();
        assert!(field.is_valid());
        assert!(!wizard.credentials.is_populated(focused));
    }
}

#[test]
fn pasting_never_overwrites_a_populated_field() {
    let mut wizard = SetupWizard::default();
    wizard.credentials.set(CredentialKind::AnthropicKey, ANTHROPIC);

    let outcome = wizard.credentials.route_paste(
        CredentialKind::AnthropicKey,
        "sk-ant-REDACTED",
    );
    assert_eq!(outcome, PasteOutcome::AlreadyPopulated(CredentialKind::AnthropicKey));
    let kept = wizard
        .credentials
        .validated(CredentialKind::AnthropicKey)
        .unwrap();
    assert_eq!(kept.expose_secret(), ANTHROPIC);
}

// ── Scenario C: commit failure and Go Back ─────────────────────

#[tokio::test]
async fn commit_failure_is_shown_verbatim_and_go_back_keeps_fields() {
    let bridge = Arc::new(FakeBridge {
        commit_error: Some("Setup failed: disk full".to_string()),
        ..FakeBridge::with_engine(true, true)
    });
    let config = test_config();
    let resolver = PresetResolver::new(bridge.clone());

    let mut wizard = wallet_ready_wizard("atlas.near").await;
    let orchestrator = ProvisioningOrchestrator::new(
        bridge.clone(),
        Arc::clone(wizard.wallet()),
        nyx_setup::setup::prober::PrepullTracker::new(),
        &config,
    );

    assert_eq!(wizard.next().await.unwrap(), WizardStep::Prerequisites);
    wizard.record_prerequisite(Prerequisite::ContainerEngine, PrerequisiteStatus::Running);
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Credentials);
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Configure);
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Guardrails);
    wizard.apply_preset(&resolver, "conservative").await.unwrap();
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Wallet);
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Provisioning);

    let failure = wizard.provision(&orchestrator).await.unwrap_err();
    assert_eq!(failure.message, "Setup failed: disk full");
    assert_eq!(failure.action, RecoveryAction::GoBack);
    assert_eq!(wizard.step(), WizardStep::Provisioning);
    assert_eq!(wizard.failure(), Some(&failure));
    assert!(matches!(orchestrator.phase(), ProvisioningPhase::Failed(_)));

    assert_eq!(wizard.recover(), Some(RecoveryAction::GoBack));
    assert_eq!(wizard.step(), WizardStep::Configure);
    assert!(wizard.failure().is_none());
    assert_eq!(wizard.config.agent_name, "Atlas");
    assert_eq!(wizard.guardrails.preset(), SecurityPreset::Conservative);
    assert_eq!(
        wizard
            .credentials
            .validated(CredentialKind::AnthropicKey)
            .unwrap()
            .expose_secret(),
        ANTHROPIC
    );

    // Exactly one commit attempt; nothing is retried behind the user's back.
    let commits = bridge.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].preset, SecurityPreset::Conservative);
}

// ── Scenario D: bounded prerequisite polling ───────────────────

#[tokio::test(start_paused = true)]
async fn polling_gives_up_after_thirty_attempts_with_a_hint() {
    let bridge = Arc::new(FakeBridge::with_engine(false, false));
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    prober.start_polling(Prerequisite::ContainerEngine);
    let mut rx = prober.subscribe(Prerequisite::ContainerEngine);
    let snapshot = rx.wait_for(|s| !s.polling).await.unwrap().clone();

    assert_eq!(snapshot.status, PrerequisiteStatus::NotInstalled);
    assert_eq!(snapshot.attempts, 30);
    assert!(snapshot.hint.as_deref().is_some_and(|h| !h.is_empty()));
    assert_eq!(snapshot.recovery_action(), Some(RecoveryAction::Recheck));
    assert_eq!(bridge.engine_checks.load(Ordering::SeqCst), 30);

    // The timer is cleared: no further probes happen.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(bridge.engine_checks.load(Ordering::SeqCst), 30);
}

#[tokio::test(start_paused = true)]
async fn stopped_engine_times_out_as_not_running() {
    let bridge = Arc::new(FakeBridge::with_engine(true, false));
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    prober.start_polling(Prerequisite::ContainerEngine);
    let mut rx = prober.subscribe(Prerequisite::ContainerEngine);
    let snapshot = rx.wait_for(|s| !s.polling).await.unwrap().clone();

    assert_eq!(snapshot.status, PrerequisiteStatus::NotRunning);
    assert!(snapshot.hint.unwrap().contains("Docker"));
    assert_eq!(
        snapshot.history,
        vec![
            PrerequisiteStatus::Checking,
            PrerequisiteStatus::Installed,
            PrerequisiteStatus::NotRunning,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn polling_stops_as_soon_as_the_engine_runs() {
    let bridge = Arc::new(FakeBridge::with_engine(true, false));
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    prober.start_polling(Prerequisite::ContainerEngine);
    tokio::time::sleep(Duration::from_secs(10)).await;
    bridge.engine.lock().unwrap().running = true;

    let mut rx = prober.subscribe(Prerequisite::ContainerEngine);
    let snapshot = rx.wait_for(|s| !s.polling).await.unwrap().clone();
    assert_eq!(snapshot.status, PrerequisiteStatus::Running);
    assert!(snapshot.attempts < 30);

    let checks = bridge.engine_checks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(bridge.engine_checks.load(Ordering::SeqCst), checks);
}

#[tokio::test]
async fn checking_passes_through_installed_and_starts_the_prepull_once() {
    let bridge = Arc::new(FakeBridge::with_engine(true, true));
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    let (engine, runtime) = prober.check_prerequisites().await;
    assert_eq!(
        engine.history,
        vec![
            PrerequisiteStatus::Checking,
            PrerequisiteStatus::Installed,
            PrerequisiteStatus::Running,
        ]
    );
    assert_eq!(engine.version.as_deref(), Some("Docker version 27.0.3"));
    assert_eq!(runtime.status, PrerequisiteStatus::NotInstalled);

    prober.check_prerequisites().await;
    let mut prepull = prober.prepull().subscribe();
    prepull
        .wait_for(|state| *state == PrepullState::Ready)
        .await
        .unwrap();
    assert_eq!(bridge.prepulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_engine_install_lands_in_not_installed_with_the_message() {
    let bridge = Arc::new(FakeBridge {
        install_engine_error: Some("Automatic Docker installation is only available on macOS".to_string()),
        ..FakeBridge::with_engine(false, false)
    });
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    prober.install(Prerequisite::ContainerEngine).await;
    let snapshot = prober.snapshot(Prerequisite::ContainerEngine);
    assert_eq!(snapshot.status, PrerequisiteStatus::NotInstalled);
    assert!(!snapshot.polling);
    assert_eq!(
        snapshot.hint.as_deref(),
        Some("Automatic Docker installation is only available on macOS")
    );
    assert_eq!(snapshot.recovery_action(), Some(RecoveryAction::Recheck));
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_install_offers_a_recheck() {
    let bridge = Arc::new(FakeBridge::with_engine(false, false));
    let mut prober = PrerequisiteProber::new(bridge.clone(), &test_config());

    prober.install(Prerequisite::ContainerEngine).await;
    let snapshot = prober.snapshot(Prerequisite::ContainerEngine);
    assert_eq!(snapshot.status, PrerequisiteStatus::Installing);
    assert!(snapshot.polling);

    prober.cancel(Prerequisite::ContainerEngine);
    let snapshot = prober.snapshot(Prerequisite::ContainerEngine);
    assert_eq!(snapshot.status, PrerequisiteStatus::NotInstalled);
    assert!(!snapshot.polling);
    assert!(snapshot.hint.as_deref().is_some_and(|h| h.contains("re-check")));
    assert_eq!(snapshot.recovery_action(), Some(RecoveryAction::Recheck));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(bridge.engine_checks.load(Ordering::SeqCst), 0);
}

// ── Wallet backup acknowledgment ───────────────────────────────

#[tokio::test]
async fn fallback_wallet_still_requires_acknowledgment() {
    let bridge = FakeBridge {
        keygen_fails: true,
        ..Default::default()
    };
    let wallet = WalletProvisioner::shared();

    generate_wallet(&wallet, &bridge, true).await.unwrap();
    let mut provisioner = wallet.lock().await;
    assert_eq!(provisioner.phase(), WalletPhase::AwaitingBackupAck);
    assert!(!provisioner.has_wallet());
    assert_eq!(
        provisioner.acknowledge_backup(),
        Err(WalletError::SecretNotRevealed)
    );

    let notice = provisioner.reveal_backup().unwrap();
    assert!(notice.is_placeholder);
    assert!(notice.secret_key.is_none());
    assert!(matches!(
        provisioner.reveal_backup(),
        Err(WalletError::AlreadyRevealed)
    ));

    provisioner.acknowledge_backup().unwrap();
    assert_eq!(provisioner.phase(), WalletPhase::Active);
    assert!(provisioner.active_wallet().unwrap().is_placeholder);
}

#[tokio::test]
async fn keygen_failure_without_fallback_offers_retry() {
    let bridge = FakeBridge {
        keygen_fails: true,
        ..Default::default()
    };
    let wallet = WalletProvisioner::shared();

    let err = generate_wallet(&wallet, &bridge, false).await.unwrap_err();
    assert!(matches!(err, WalletError::GenerationFailed(_)));
    let failure = nyx_setup::Error::from(err);
    assert_eq!(failure.recovery_action(), RecoveryAction::Retry);

    let provisioner = wallet.lock().await;
    assert_eq!(provisioner.phase(), WalletPhase::NoWallet);
    assert_eq!(provisioner.last_error(), Some("keychain unavailable"));
}

#[tokio::test]
async fn wizard_blocks_while_backup_is_pending() {
    let bridge = FakeBridge::default();
    let mut wizard = SetupWizard::default();
    wizard.credentials.set(CredentialKind::AnthropicKey, ANTHROPIC);
    wizard.record_prerequisite(Prerequisite::ContainerEngine, PrerequisiteStatus::Running);
    for _ in 0..5 {
        wizard.next().await.unwrap();
    }
    assert_eq!(wizard.step(), WizardStep::Wallet);

    generate_wallet(wizard.wallet(), &bridge, false).await.unwrap();
    assert_eq!(wizard.next().await, Err(StepBlocked::WalletPending));

    {
        let mut provisioner = wizard.wallet().lock().await;
        let notice = provisioner.reveal_backup().unwrap();
        assert!(notice.secret_key.is_some());
        provisioner.acknowledge_backup().unwrap();
    }
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Provisioning);
    assert_eq!(wizard.next().await, Err(StepBlocked::NotManual));
}

#[tokio::test]
async fn wizard_gates_prerequisites_and_primary_key() {
    let mut wizard = SetupWizard::default();
    wizard.next().await.unwrap();

    wizard.record_prerequisite(Prerequisite::ContainerEngine, PrerequisiteStatus::NotRunning);
    assert_eq!(
        wizard.next().await,
        Err(StepBlocked::PrerequisiteNotReady(
            Prerequisite::ContainerEngine,
            PrerequisiteStatus::NotRunning
        ))
    );

    wizard.record_prerequisite(Prerequisite::ContainerEngine, PrerequisiteStatus::Running);
    assert_eq!(wizard.next().await.unwrap(), WizardStep::Credentials);
    assert!(matches!(
        wizard.next().await,
        Err(StepBlocked::Invalid(ValidationError::MissingPrimaryKey(_)))
    ));

    assert_eq!(wizard.back(), WizardStep::Prerequisites);
}

// ── Orchestrator end to end ────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn provisioning_waits_for_backup_then_commits_once() {
    let bridge = Arc::new(FakeBridge::with_engine(true, true));
    let config = test_config();
    let wallet = WalletProvisioner::shared();
    let orchestrator = ProvisioningOrchestrator::new(
        bridge.clone(),
        Arc::clone(&wallet),
        nyx_setup::setup::prober::PrepullTracker::new(),
        &config,
    );

    let mut wizard = SetupWizard::new(Arc::clone(&wallet));
    wizard.credentials.set(CredentialKind::AnthropicKey, ANTHROPIC);

    let acknowledger = {
        let wallet = Arc::clone(&wallet);
        let mut phases = orchestrator.subscribe();
        tokio::spawn(async move {
            phases
                .wait_for(|phase| *phase == ProvisioningPhase::AwaitingBackupAck)
                .await
                .unwrap();
            let mut provisioner = wallet.lock().await;
            let notice = provisioner.reveal_backup().unwrap();
            assert!(
                notice
                    .secret_key
                    .as_ref()
                    .is_some_and(|s| s.expose_secret().starts_with("ed25519:"))
            );
            provisioner.acknowledge_backup().unwrap();
            notice.address
        })
    };

    let address = wizard.provision(&orchestrator).await.unwrap();
    let acknowledged = acknowledger.await.unwrap();

    assert_eq!(address, acknowledged);
    assert_eq!(wizard.step(), WizardStep::Complete);
    assert_eq!(wizard.active_address(), Some(address.as_str()));
    assert!(wizard.credentials.is_empty());
    assert_eq!(
        orchestrator.phase(),
        ProvisioningPhase::Complete {
            active_address: address.clone()
        }
    );

    let commits = bridge.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].agent_name, "Nyx");
    assert_eq!(commits[0].wallet_addresses, vec![address]);
    assert!(commits[0].has_anthropic);
}

#[tokio::test]
async fn invalid_drafts_never_reach_the_bridge() {
    let bridge = Arc::new(FakeBridge::with_engine(true, true));
    let config = test_config();
    let mut wizard = wallet_ready_wizard("atlas.near").await;
    wizard
        .credentials
        .set(CredentialKind::SlackToken, "not-a-slack-token");
    let orchestrator = ProvisioningOrchestrator::new(
        bridge.clone(),
        Arc::clone(wizard.wallet()),
        nyx_setup::setup::prober::PrepullTracker::new(),
        &config,
    );

    let failure = wizard.provision(&orchestrator).await.unwrap_err();
    assert_eq!(failure.action, RecoveryAction::GoBack);
    assert!(failure.message.contains("slack_token"));
    assert!(bridge.commits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn imported_wallets_do_not_skip_a_pending_backup() {
    let bridge = Arc::new(FakeBridge::with_engine(true, true));
    let config = test_config();
    let mut wizard = wallet_ready_wizard("atlas.near").await;
    generate_wallet(wizard.wallet(), bridge.as_ref(), false)
        .await
        .unwrap();
    let orchestrator = ProvisioningOrchestrator::new(
        bridge.clone(),
        Arc::clone(wizard.wallet()),
        nyx_setup::setup::prober::PrepullTracker::new(),
        &config,
    );

    let acknowledger = {
        let wallet = Arc::clone(wizard.wallet());
        let bridge = bridge.clone();
        let mut phases = orchestrator.subscribe();
        tokio::spawn(async move {
            phases
                .wait_for(|phase| *phase == ProvisioningPhase::AwaitingBackupAck)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            let committed_early = !bridge.commits().is_empty();
            let mut provisioner = wallet.lock().await;
            let notice = provisioner.reveal_backup().unwrap();
            provisioner.acknowledge_backup().unwrap();
            (committed_early, notice.address)
        })
    };

    let address = wizard.provision(&orchestrator).await.unwrap();
    let (committed_early, generated) = acknowledger.await.unwrap();

    assert!(!committed_early);
    // The imported wallet was first, so it stays the active one.
    assert_eq!(address, "atlas.near");
    let commits = bridge.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(
        commits[0].wallet_addresses,
        vec![generated, "atlas.near".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn generation_falling_back_to_no_wallet_ends_with_retry() {
    let bridge = Arc::new(FakeBridge::with_engine(true, true));
    let config = test_config();
    let mut wizard = wallet_ready_wizard("atlas.near").await;
    wizard.wallet().lock().await.begin_generation().unwrap();
    let orchestrator = ProvisioningOrchestrator::new(
        bridge.clone(),
        Arc::clone(wizard.wallet()),
        nyx_setup::setup::prober::PrepullTracker::new(),
        &config,
    );

    let in_flight = {
        let wallet = Arc::clone(wizard.wallet());
        let mut phases = orchestrator.subscribe();
        tokio::spawn(async move {
            phases
                .wait_for(|phase| *phase == ProvisioningPhase::AwaitingBackupAck)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            let result = Err(BridgeError::Rejected("keychain unavailable".to_string()));
            wallet
                .lock()
                .await
                .complete_generation(result, false)
                .unwrap_err();
        })
    };

    let failure = tokio::time::timeout(Duration::from_secs(60), wizard.provision(&orchestrator))
        .await
        .expect("provisioning finished")
        .unwrap_err();
    in_flight.await.unwrap();

    assert_eq!(failure.action, RecoveryAction::Retry);
    assert!(failure.message.contains("keychain unavailable"));
    assert!(matches!(orchestrator.phase(), ProvisioningPhase::Failed(_)));
    assert!(bridge.commits().is_empty());
    assert_eq!(wizard.recover(), Some(RecoveryAction::Retry));
    assert_eq!(wizard.step(), WizardStep::Provisioning);
}
