//! Provisioning orchestrator.
//!
//! Sequencing is strict: a wallet exists and its backup is acknowledged
//! before the request is assembled, and the request is committed in exactly
//! one bridge call. A failed commit is reported verbatim and never retried
//! here.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::bridge::NativeBridge;
use crate::config::SetupRuntimeConfig;
use crate::error::{Error, RecoveryAction, WalletError};
use crate::setup::credentials::CredentialDraft;
use crate::setup::guardrails::GuardrailSelection;
use crate::setup::prober::{PrepullState, PrepullTracker};
use crate::setup::request::{ConfigurationDraft, ProvisioningRequest};
use crate::setup::wallet::{SharedWallet, WalletPhase, generate_wallet};

/// A terminal provisioning failure and the one way out of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitFailure {
    pub message: String,
    pub action: RecoveryAction,
}

impl From<&Error> for CommitFailure {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            action: e.recovery_action(),
        }
    }
}

/// Coarse progress of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum ProvisioningPhase {
    Idle,
    GeneratingWallet,
    AwaitingBackupAck,
    Committing { status: String },
    Complete { active_address: String },
    Failed(CommitFailure),
}

/// Status text shown while the commit call is in flight.
pub fn commit_status(prepull: &PrepullState) -> &'static str {
    match prepull {
        PrepullState::Ready => "Writing configuration and starting your agent...",
        PrepullState::Pulling => {
            "Downloading the agent runtime. This can take a few minutes on first setup..."
        }
        PrepullState::NotStarted | PrepullState::Failed(_) => "Preparing the agent runtime...",
    }
}

pub struct ProvisioningOrchestrator {
    bridge: Arc<dyn NativeBridge>,
    wallet: SharedWallet,
    prepull: PrepullTracker,
    backup_ack_poll: Duration,
    status_refresh: Duration,
    dev_wallet_fallback: bool,
    phase: watch::Sender<ProvisioningPhase>,
}

impl ProvisioningOrchestrator {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        wallet: SharedWallet,
        prepull: PrepullTracker,
        config: &SetupRuntimeConfig,
    ) -> Self {
        let (phase, _) = watch::channel(ProvisioningPhase::Idle);
        Self {
            bridge,
            wallet,
            prepull,
            backup_ack_poll: config.backup_ack_poll,
            status_refresh: config.status_refresh,
            dev_wallet_fallback: config.dev_wallet_fallback,
            phase,
        }
    }

    pub fn phase(&self) -> ProvisioningPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProvisioningPhase> {
        self.phase.subscribe()
    }

    fn publish(&self, phase: ProvisioningPhase) {
        self.phase.send_replace(phase);
    }

    fn fail(&self, e: Error) -> Error {
        tracing::warn!("Provisioning failed: {}", e);
        self.publish(ProvisioningPhase::Failed(CommitFailure::from(&e)));
        e
    }

    /// Run the provisioning sequence once.
    ///
    /// Returns the active wallet address reported by the bridge.
    pub async fn provision(
        &self,
        draft: &ConfigurationDraft,
        credentials: &CredentialDraft,
        guardrails: &GuardrailSelection,
    ) -> Result<String, Error> {
        self.ensure_wallet().await?;

        let wallets = self.wallet.lock().await.wallets();
        let request = ProvisioningRequest::assemble(draft, credentials, guardrails, wallets)
            .map_err(|e| self.fail(e.into()))?;

        tracing::info!(
            provider = request.default_provider.id(),
            preset = %request.guardrail_preset,
            wallets = request.wallets.len(),
            "Committing provisioning request"
        );
        let result = self.commit_with_status(&request).await;

        match result {
            Ok(active_address) => {
                tracing::info!("Provisioning complete");
                self.publish(ProvisioningPhase::Complete {
                    active_address: active_address.clone(),
                });
                Ok(active_address)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Generate a wallet if none exists, then wait for the backup to be
    /// acknowledged.
    ///
    /// A generation already in flight or awaiting its backup is always waited
    /// on, even when imported wallets exist. Falling back to `NoWallet` while
    /// waiting ends the run with a retryable generation failure.
    async fn ensure_wallet(&self) -> Result<(), Error> {
        let phase = {
            let wallet = self.wallet.lock().await;
            match wallet.phase() {
                WalletPhase::Active => return Ok(()),
                WalletPhase::NoWallet if wallet.has_wallet() => return Ok(()),
                phase => phase,
            }
        };

        if phase == WalletPhase::NoWallet {
            self.publish(ProvisioningPhase::GeneratingWallet);
            generate_wallet(&self.wallet, self.bridge.as_ref(), self.dev_wallet_fallback)
                .await
                .map_err(|e| self.fail(e.into()))?;
        }

        self.publish(ProvisioningPhase::AwaitingBackupAck);
        loop {
            let failed = {
                let wallet = self.wallet.lock().await;
                match wallet.phase() {
                    WalletPhase::Active => return Ok(()),
                    WalletPhase::NoWallet => Some(
                        wallet
                            .last_error()
                            .unwrap_or("Wallet generation did not complete")
                            .to_string(),
                    ),
                    WalletPhase::Generating | WalletPhase::AwaitingBackupAck => None,
                }
            };
            if let Some(message) = failed {
                return Err(self.fail(WalletError::GenerationFailed(message).into()));
            }
            tokio::time::sleep(self.backup_ack_poll).await;
        }
    }

    /// Drive the commit while refreshing the status text on a fixed tick.
    async fn commit_with_status(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<String, crate::error::BridgeError> {
        let commit = self.bridge.commit(request);
        tokio::pin!(commit);
        let mut ticker = tokio::time::interval(self.status_refresh);

        loop {
            tokio::select! {
                result = &mut commit => return result,
                _ = ticker.tick() => {
                    let status = commit_status(&self.prepull.state()).to_string();
                    self.phase.send_if_modified(|phase| {
                        let next = ProvisioningPhase::Committing { status };
                        if *phase == next {
                            false
                        } else {
                            *phase = next;
                            true
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_follows_prepull_progress() {
        assert_eq!(
            commit_status(&PrepullState::Ready),
            "Writing configuration and starting your agent..."
        );
        assert!(commit_status(&PrepullState::Pulling).starts_with("Downloading"));
        assert_eq!(
            commit_status(&PrepullState::Failed("pull denied".into())),
            commit_status(&PrepullState::NotStarted)
        );
    }

    #[test]
    fn commit_failure_keeps_bridge_message_verbatim() {
        let err = Error::from(crate::error::BridgeError::Rejected(
            "Setup failed: disk full".into(),
        ));
        let failure = CommitFailure::from(&err);
        assert_eq!(failure.message, "Setup failed: disk full");
        assert_eq!(failure.action, RecoveryAction::GoBack);
    }
}
