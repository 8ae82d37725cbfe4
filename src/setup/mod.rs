//! Setup and provisioning flow.
//!
//! Components, leaf first:
//! - [`prober`]: container engine and model runtime detection and polling
//! - [`credentials`]: local credential validation and paste routing
//! - [`guardrails`]: risk presets with a local fallback table
//! - [`wallet`]: keypair generation and one-time backup acknowledgment
//! - [`orchestrator`]: assembles the request and commits it once
//!
//! [`wizard::SetupWizard`] ties them together as one explicit state struct.

pub mod credentials;
pub mod guardrails;
pub mod orchestrator;
pub mod prober;
pub mod request;
pub mod wallet;
pub mod wizard;

pub use credentials::{CredentialDraft, CredentialKind, LlmProvider, PasteOutcome};
pub use guardrails::{GuardrailBundle, GuardrailSelection, PresetResolver, SecurityPreset};
pub use orchestrator::{CommitFailure, ProvisioningOrchestrator, ProvisioningPhase};
pub use prober::{Prerequisite, PrerequisiteProber, PrerequisiteStatus, PrepullState};
pub use request::{ConfigurationDraft, ProvisioningRequest};
pub use wallet::{Chain, WalletEntry, WalletPhase, WalletProvisioner};
pub use wizard::{SetupWizard, WizardStep};
