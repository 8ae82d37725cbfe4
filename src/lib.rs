//! Nyx setup: the provisioning state machine for the Nyx desktop agent.
//!
//! The flow probes the container engine and local-model runtime, collects
//! and validates credentials, resolves guardrail presets, provisions a wallet
//! with a one-time backup acknowledgment, and commits everything to the host
//! through a [`bridge::NativeBridge`] in a single call.

pub mod bootstrap;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod error;
pub mod setup;

pub use config::SetupRuntimeConfig;
pub use error::{Error, Result};
