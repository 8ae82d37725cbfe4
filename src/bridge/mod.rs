//! Native bridge contract.
//!
//! The bridge is the privileged host-side collaborator that performs real
//! OS, process, and file work on behalf of the setup flow. Everything in
//! [`crate::setup`] talks to it through [`NativeBridge`] and never inspects how
//! it persists anything.

pub mod docker;
pub mod keys;
pub mod local;
pub mod ollama;
pub mod writer;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::setup::guardrails::{GuardrailBundle, SecurityPreset};
use crate::setup::request::ProvisioningRequest;
use crate::setup::wallet::WalletEntry;

pub use self::local::LocalBridge;

/// Container engine status as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEngineStatus {
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
    /// Download link offered when the engine is missing.
    pub download_url: Option<String>,
}

/// Local-model runtime status as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRuntimeStatus {
    pub installed: bool,
    pub running: bool,
    pub version: Option<String>,
}

/// A freshly generated keypair.
///
/// `secret_key` is the only copy the setup flow ever receives.
#[derive(Debug)]
pub struct GeneratedWallet {
    pub entry: WalletEntry,
    pub public_key: String,
    pub secret_key: SecretString,
}

/// Operations the setup flow needs from the host.
#[async_trait]
pub trait NativeBridge: Send + Sync {
    async fn check_container_engine(&self) -> Result<ContainerEngineStatus, BridgeError>;

    /// Start installing the container engine. Returns a human-readable status line.
    async fn install_container_engine(&self) -> Result<String, BridgeError>;

    async fn check_model_runtime(&self) -> Result<ModelRuntimeStatus, BridgeError>;

    /// Start installing the local-model runtime. Returns a human-readable status line.
    async fn install_model_runtime(&self) -> Result<String, BridgeError>;

    /// Pull the agent runtime image ahead of the commit.
    async fn prepull_image(&self) -> Result<(), BridgeError>;

    async fn generate_keypair(&self) -> Result<GeneratedWallet, BridgeError>;

    async fn resolve_guardrail_preset(
        &self,
        preset: SecurityPreset,
    ) -> Result<GuardrailBundle, BridgeError>;

    /// Write the complete configuration and bring the agent runtime up.
    ///
    /// All-or-nothing from the caller's perspective. Returns the active wallet
    /// address (or a completion marker when no wallet is active).
    async fn commit(&self, request: &ProvisioningRequest) -> Result<String, BridgeError>;

    async fn is_setup_complete(&self) -> Result<bool, BridgeError>;
}
