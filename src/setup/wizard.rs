//! Setup wizard state.
//!
//! The wizard guides users through:
//! 1. Welcome
//! 2. Prerequisites (Docker, optionally Ollama)
//! 3. Credentials (primary provider key, optional extras)
//! 4. Configuration (agent name, channels, email schedule, capabilities)
//! 5. Guardrails (risk preset or custom limits)
//! 6. Wallet (generate or import, acknowledge backup)
//! 7. Provisioning
//!
//! All state lives in [`SetupWizard`]; every transition is a method that
//! either moves to the next step or reports why it cannot. Nothing here
//! renders or prompts, so the sequencing can be tested without a UI.

use serde::Serialize;

use crate::error::{RecoveryAction, ValidationError};
use crate::setup::credentials::{CredentialDraft, LlmProvider};
use crate::setup::guardrails::{GuardrailSelection, PresetResolver};
use crate::setup::orchestrator::{CommitFailure, ProvisioningOrchestrator};
use crate::setup::prober::{Prerequisite, PrerequisiteStatus};
use crate::setup::request::ConfigurationDraft;
use crate::setup::wallet::{SharedWallet, WalletPhase, WalletProvisioner};

/// Wizard steps in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Welcome,
    Prerequisites,
    Credentials,
    Configure,
    Guardrails,
    Wallet,
    Provisioning,
    Complete,
}

impl WizardStep {
    pub const ALL: [WizardStep; 8] = [
        Self::Welcome,
        Self::Prerequisites,
        Self::Credentials,
        Self::Configure,
        Self::Guardrails,
        Self::Wallet,
        Self::Provisioning,
        Self::Complete,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome",
            Self::Prerequisites => "Prerequisites",
            Self::Credentials => "Inference Provider",
            Self::Configure => "Channels and Schedule",
            Self::Guardrails => "Guardrails",
            Self::Wallet => "Wallet",
            Self::Provisioning => "Starting Your Agent",
            Self::Complete => "Complete",
        }
    }

    fn next(self) -> Option<Self> {
        let index = Self::ALL.iter().position(|step| *step == self)?;
        Self::ALL.get(index + 1).copied()
    }

    fn previous(self) -> Option<Self> {
        let index = Self::ALL.iter().position(|step| *step == self)?;
        index.checked_sub(1).map(|i| Self::ALL[i])
    }
}

/// Why the current step cannot advance.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepBlocked {
    #[error("{} is {}", .0.display_name(), .1.as_str())]
    PrerequisiteNotReady(Prerequisite, PrerequisiteStatus),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Wallet backup has not been acknowledged yet")]
    WalletPending,

    #[error("This step completes on its own")]
    NotManual,
}

/// The whole wizard as one explicit state struct.
pub struct SetupWizard {
    step: WizardStep,
    pub credentials: CredentialDraft,
    pub config: ConfigurationDraft,
    pub guardrails: GuardrailSelection,
    wallet: SharedWallet,
    container_engine: PrerequisiteStatus,
    model_runtime: PrerequisiteStatus,
    failure: Option<CommitFailure>,
    active_address: Option<String>,
}

impl Default for SetupWizard {
    fn default() -> Self {
        Self::new(WalletProvisioner::shared())
    }
}

impl SetupWizard {
    /// Return the ordered onboarding step titles.
    pub fn onboarding_step_titles() -> Vec<&'static str> {
        WizardStep::ALL.iter().map(|step| step.title()).collect()
    }

    pub fn new(wallet: SharedWallet) -> Self {
        Self {
            step: WizardStep::Welcome,
            credentials: CredentialDraft::new(),
            config: ConfigurationDraft::default(),
            guardrails: GuardrailSelection::default(),
            wallet,
            container_engine: PrerequisiteStatus::Checking,
            model_runtime: PrerequisiteStatus::Checking,
            failure: None,
            active_address: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn wallet(&self) -> &SharedWallet {
        &self.wallet
    }

    pub fn failure(&self) -> Option<&CommitFailure> {
        self.failure.as_ref()
    }

    pub fn active_address(&self) -> Option<&str> {
        self.active_address.as_deref()
    }

    /// Record the latest prober status for a prerequisite.
    pub fn record_prerequisite(&mut self, dependency: Prerequisite, status: PrerequisiteStatus) {
        match dependency {
            Prerequisite::ContainerEngine => self.container_engine = status,
            Prerequisite::ModelRuntime => self.model_runtime = status,
        }
    }

    fn require_running(&self, dependency: Prerequisite) -> Result<(), StepBlocked> {
        let status = match dependency {
            Prerequisite::ContainerEngine => self.container_engine,
            Prerequisite::ModelRuntime => self.model_runtime,
        };
        if status == PrerequisiteStatus::Running {
            Ok(())
        } else {
            Err(StepBlocked::PrerequisiteNotReady(dependency, status))
        }
    }

    /// Check whether the current step's gate is satisfied.
    pub async fn can_advance(&self) -> Result<(), StepBlocked> {
        match self.step {
            WizardStep::Welcome => Ok(()),
            WizardStep::Prerequisites => self.require_running(Prerequisite::ContainerEngine),
            WizardStep::Credentials => {
                if self.config.default_provider == LlmProvider::Ollama {
                    self.require_running(Prerequisite::ModelRuntime)?;
                }
                self.credentials.check_ready(self.config.default_provider)?;
                Ok(())
            }
            WizardStep::Configure => {
                let errors = self.config.validate(&self.credentials);
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(ValidationError::Fields(errors).into())
                }
            }
            WizardStep::Guardrails => Ok(self.guardrails.validate()?),
            WizardStep::Wallet => match self.wallet.lock().await.phase() {
                WalletPhase::Generating | WalletPhase::AwaitingBackupAck => {
                    Err(StepBlocked::WalletPending)
                }
                WalletPhase::NoWallet | WalletPhase::Active => Ok(()),
            },
            WizardStep::Provisioning | WizardStep::Complete => Err(StepBlocked::NotManual),
        }
    }

    /// Move forward one step if the current gate allows it.
    pub async fn next(&mut self) -> Result<WizardStep, StepBlocked> {
        self.can_advance().await?;
        if let Some(next) = self.step.next() {
            tracing::info!(from = ?self.step, to = ?next, "Wizard advanced");
            self.step = next;
        }
        Ok(self.step)
    }

    /// Move back one step. Not available once provisioning has started.
    pub fn back(&mut self) -> WizardStep {
        if self.step < WizardStep::Provisioning
            && let Some(previous) = self.step.previous()
        {
            self.step = previous;
        }
        self.step
    }

    /// Apply a guardrail preset by name through the resolver.
    pub async fn apply_preset(
        &mut self,
        resolver: &PresetResolver,
        name: &str,
    ) -> Result<(), ValidationError> {
        resolver.apply_preset(&mut self.guardrails, name).await
    }

    /// Run provisioning from the Provisioning step and record the outcome.
    pub async fn provision(
        &mut self,
        orchestrator: &ProvisioningOrchestrator,
    ) -> Result<String, CommitFailure> {
        let outcome = orchestrator
            .provision(&self.config, &self.credentials, &self.guardrails)
            .await
            .map_err(|e| CommitFailure::from(&e));
        self.apply_outcome(outcome.clone());
        outcome
    }

    /// Reducer for the provisioning result.
    ///
    /// Success clears every held credential and completes the wizard. Failure
    /// keeps the wizard on the Provisioning step showing the message.
    pub fn apply_outcome(&mut self, outcome: Result<String, CommitFailure>) {
        match outcome {
            Ok(address) => {
                self.credentials.clear();
                self.failure = None;
                self.active_address = Some(address);
                self.step = WizardStep::Complete;
            }
            Err(failure) => {
                self.failure = Some(failure);
                self.step = WizardStep::Provisioning;
            }
        }
    }

    /// Take the single recovery action offered by the current failure.
    ///
    /// `GoBack` returns to configuration with every field intact, `Recheck`
    /// returns to prerequisites, and `Retry` stays put so provisioning can
    /// run again.
    pub fn recover(&mut self) -> Option<RecoveryAction> {
        let failure = self.failure.take()?;
        self.step = match failure.action {
            RecoveryAction::GoBack => WizardStep::Configure,
            RecoveryAction::Recheck => WizardStep::Prerequisites,
            RecoveryAction::Retry => WizardStep::Provisioning,
        };
        Some(failure.action)
    }
}

/// Mask an API key for display: first 6 and last 4 characters.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        let prefix: String = chars.iter().take(4).collect();
        return format!("{prefix}...");
    }
    let prefix: String = chars[..6].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{prefix}...{suffix}")
}
