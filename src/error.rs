//! Error types for the setup flow.

use serde::Serialize;

/// Top-level error type for setup and provisioning.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the native bridge.
///
/// `Rejected` carries the bridge's own message and displays it verbatim so the
/// wizard can show the user exactly what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{0}")]
    Rejected(String),

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Docker engine error: {0}")]
    Docker(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown guardrail preset: {0}")]
    UnknownPreset(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Http(e.to_string())
    }
}

impl From<bollard::errors::Error> for BridgeError {
    fn from(e: bollard::errors::Error) -> Self {
        BridgeError::Docker(e.to_string())
    }
}

/// A single credential or form field that failed its local check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Local validation failures. These never reach the bridge.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{} field(s) need attention: {}", .0.len(), join_fields(.0))]
    Fields(Vec<FieldError>),

    #[error("Unknown guardrail preset '{0}'. Expected conservative, balanced, autonomous, or custom.")]
    UnknownPreset(String),

    #[error("Guardrails can only be edited directly after selecting the Custom preset")]
    PresetNotCustom,

    #[error("A primary provider key is required for {0}")]
    MissingPrimaryKey(&'static str),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Wallet provisioning state machine violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet is {actual}, expected {expected}")]
    InvalidTransition {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("The recovery key must be shown before backup can be acknowledged")]
    SecretNotRevealed,

    #[error("The recovery key has already been shown and cannot be displayed again")]
    AlreadyRevealed,

    #[error("Wallet generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid {chain} address: {message}")]
    InvalidAddress { chain: String, message: String },
}

/// The single recovery action a terminal failure offers the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Recheck,
    GoBack,
}

impl RecoveryAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Retry => "Retry",
            Self::Recheck => "Re-check",
            Self::GoBack => "Go Back",
        }
    }
}

impl Error {
    /// The one recovery action the UI should offer for this failure.
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Error::Config(_) => RecoveryAction::Recheck,
            Error::Bridge(_) | Error::Validation(_) => RecoveryAction::GoBack,
            Error::Wallet(_) => RecoveryAction::Retry,
        }
    }
}

/// Result type alias for the setup flow.
pub type Result<T> = std::result::Result<T, Error>;
