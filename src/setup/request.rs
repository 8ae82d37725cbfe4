//! The provisioning request aggregate and the non-secret configuration it is
//! assembled from.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, ValidationError};
use crate::setup::credentials::{CredentialDraft, CredentialKind, LlmProvider};
use crate::setup::guardrails::{GuardrailBundle, GuardrailSelection, SecurityPreset};
use crate::setup::wallet::WalletEntry;

pub const DEFAULT_AGENT_NAME: &str = "Nyx";

/// How much a channel may do without the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    #[default]
    DraftOnly,
    SendWithConfirm,
    Autonomous,
}

impl Autonomy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DraftOnly => "draft_only",
            Self::SendWithConfirm => "send_with_confirm",
            Self::Autonomous => "autonomous",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub autonomy: Autonomy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Gmail,
    WhatsApp,
    Telegram,
    Slack,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Self::Gmail, Self::WhatsApp, Self::Telegram, Self::Slack];

    pub fn id(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::WhatsApp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Slack => "slack",
        }
    }

    /// Credential that must validate before the channel can be enabled.
    /// Gmail is gated on Google authentication instead.
    pub fn credential(self) -> Option<CredentialKind> {
        match self {
            Self::Gmail => None,
            Self::WhatsApp => Some(CredentialKind::WhatsAppPhone),
            Self::Telegram => Some(CredentialKind::TelegramToken),
            Self::Slack => Some(CredentialKind::SlackToken),
        }
    }

    fn field_name(self) -> &'static str {
        match self {
            Self::Gmail => "messaging.gmail",
            Self::WhatsApp => "messaging.whatsapp",
            Self::Telegram => "messaging.telegram",
            Self::Slack => "messaging.slack",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub gmail: ChannelConfig,
    pub whatsapp: ChannelConfig,
    pub telegram: ChannelConfig,
    pub slack: ChannelConfig,
}

impl MessagingConfig {
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Gmail => &self.gmail,
            Channel::WhatsApp => &self.whatsapp,
            Channel::Telegram => &self.telegram,
            Channel::Slack => &self.slack,
        }
    }

    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelConfig {
        match channel {
            Channel::Gmail => &mut self.gmail,
            Channel::WhatsApp => &mut self.whatsapp,
            Channel::Telegram => &mut self.telegram,
            Channel::Slack => &mut self.slack,
        }
    }

    /// Enabled channels whose prerequisite credential is missing or invalid.
    pub fn validate(
        &self,
        credentials: &CredentialDraft,
        google_authenticated: bool,
    ) -> Vec<FieldError> {
        Channel::ALL
            .into_iter()
            .filter(|channel| self.channel(*channel).enabled)
            .filter_map(|channel| match channel.credential() {
                None if !google_authenticated => Some(FieldError::new(
                    channel.field_name(),
                    "connect your Google account before enabling Gmail",
                )),
                None => None,
                Some(kind) if credentials.validated(kind).is_none() => Some(FieldError::new(
                    channel.field_name(),
                    format!("needs a valid {} first", kind.field_name()),
                )),
                Some(_) => None,
            })
            .collect()
    }

    /// Where scheduled reports are delivered: WhatsApp, then Telegram, then
    /// Slack, then the gateway UI.
    pub fn delivery_channel(&self) -> &'static str {
        [Channel::WhatsApp, Channel::Telegram, Channel::Slack]
            .into_iter()
            .find(|channel| self.channel(*channel).enabled)
            .map_or("gateway", Channel::id)
    }
}

/// When the agent triages and digests email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSchedule {
    pub enabled: bool,
    pub timezone: String,
    pub digest_hour: u8,
    pub digest_minute: u8,
    pub triage_start_hour: u8,
    pub triage_end_hour: u8,
}

impl Default for EmailSchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "Europe/London".to_string(),
            digest_hour: 8,
            digest_minute: 30,
            triage_start_hour: 8,
            triage_end_hour: 22,
        }
    }
}

impl EmailSchedule {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.timezone.trim().is_empty() {
            errors.push(FieldError::new("email.timezone", "must not be empty"));
        }
        for (field, hour) in [
            ("email.digest_hour", self.digest_hour),
            ("email.triage_start_hour", self.triage_start_hour),
            ("email.triage_end_hour", self.triage_end_hour),
        ] {
            if hour >= 24 {
                errors.push(FieldError::new(field, "must be between 0 and 23"));
            }
        }
        if self.digest_minute >= 60 {
            errors.push(FieldError::new("email.digest_minute", "must be between 0 and 59"));
        }
        if self.triage_start_hour > self.triage_end_hour {
            errors.push(FieldError::new(
                "email.triage_start_hour",
                "must not be after the triage end hour",
            ));
        }
        errors
    }
}

/// Feature areas the agent is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityToggles {
    pub defi_crypto: bool,
    pub travel: bool,
    pub google_workspace: bool,
    pub email_intelligence: bool,
    pub communications: bool,
    pub source_intelligence: bool,
}

impl Default for CapabilityToggles {
    fn default() -> Self {
        Self {
            defi_crypto: true,
            travel: true,
            google_workspace: true,
            email_intelligence: true,
            communications: true,
            source_intelligence: true,
        }
    }
}

/// Everything the wizard collects apart from secrets, wallets and guardrails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationDraft {
    pub agent_name: String,
    pub default_provider: LlmProvider,
    pub ollama_model: Option<String>,
    pub google_authenticated: bool,
    pub messaging: MessagingConfig,
    pub email: EmailSchedule,
    pub capabilities: CapabilityToggles,
}

impl Default for ConfigurationDraft {
    fn default() -> Self {
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            default_provider: LlmProvider::Anthropic,
            ollama_model: None,
            google_authenticated: false,
            messaging: MessagingConfig::default(),
            email: EmailSchedule::default(),
            capabilities: CapabilityToggles::default(),
        }
    }
}

impl ConfigurationDraft {
    /// The chosen local model, trimmed, if one was entered.
    pub fn local_model(&self) -> Option<&str> {
        self.ollama_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }

    /// Field errors for the configuration step, checked against the
    /// credentials the channels depend on.
    pub fn validate(&self, credentials: &CredentialDraft) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.agent_name.trim().is_empty() {
            errors.push(FieldError::new("agent_name", "must not be empty"));
        }
        if self.default_provider == LlmProvider::Ollama && self.local_model().is_none() {
            errors.push(FieldError::new(
                "ollama_model",
                "choose a local model when Ollama is the primary provider",
            ));
        }
        errors.extend(
            self.messaging
                .validate(credentials, self.google_authenticated),
        );
        errors.extend(self.email.validate());
        errors
    }
}

/// Provider keys that passed local validation.
#[derive(Debug, Default)]
pub struct ProviderKeys {
    pub anthropic: Option<SecretString>,
    pub openai: Option<SecretString>,
    pub venice: Option<SecretString>,
    pub nearai: Option<SecretString>,
    pub perplexity: Option<SecretString>,
}

/// Channel credentials that passed local validation.
#[derive(Debug, Default)]
pub struct ChannelCredentials {
    pub telegram_token: Option<SecretString>,
    pub slack_token: Option<SecretString>,
    pub whatsapp_phone: Option<String>,
}

/// Snapshot of all wizard state, sent to the bridge in one commit.
#[derive(Debug)]
pub struct ProvisioningRequest {
    pub agent_name: String,
    pub default_provider: LlmProvider,
    pub ollama_model: Option<String>,
    pub provider_keys: ProviderKeys,
    pub channel_credentials: ChannelCredentials,
    pub google_authenticated: bool,
    pub messaging: MessagingConfig,
    pub email: EmailSchedule,
    pub capabilities: CapabilityToggles,
    pub wallets: Vec<WalletEntry>,
    pub active_wallet_id: Option<String>,
    pub guardrail_preset: SecurityPreset,
    pub guardrails: GuardrailBundle,
}

impl ProvisioningRequest {
    /// Assemble the request from the wizard's step state.
    ///
    /// Only credentials whose local check passes are copied in; anything
    /// invalid or inconsistent fails the whole assembly.
    pub fn assemble(
        draft: &ConfigurationDraft,
        credentials: &CredentialDraft,
        guardrails: &GuardrailSelection,
        wallets: Vec<WalletEntry>,
    ) -> Result<Self, ValidationError> {
        credentials.check_ready(draft.default_provider)?;

        let mut errors = draft.validate(credentials);
        let agent_name = draft.agent_name.trim();
        let ollama_model = draft.local_model().map(str::to_string);
        if let Err(ValidationError::Fields(guardrail_errors)) = guardrails.validate() {
            errors.extend(guardrail_errors);
        }
        if !errors.is_empty() {
            return Err(ValidationError::Fields(errors));
        }

        let key = |kind: CredentialKind| {
            credentials
                .validated(kind)
                .map(|secret| SecretString::from(secret.expose_secret().to_owned()))
        };
        let active_wallet_id = wallets
            .iter()
            .find(|w| w.is_active)
            .or_else(|| wallets.first())
            .map(|w| w.id.clone());

        Ok(Self {
            agent_name: agent_name.to_string(),
            default_provider: draft.default_provider,
            ollama_model,
            provider_keys: ProviderKeys {
                anthropic: key(CredentialKind::AnthropicKey),
                openai: key(CredentialKind::OpenAiKey),
                venice: key(CredentialKind::VeniceKey),
                nearai: key(CredentialKind::NearAiKey),
                perplexity: key(CredentialKind::PerplexityKey),
            },
            channel_credentials: ChannelCredentials {
                telegram_token: key(CredentialKind::TelegramToken),
                slack_token: key(CredentialKind::SlackToken),
                whatsapp_phone: credentials
                    .validated(CredentialKind::WhatsAppPhone)
                    .map(|phone| phone.expose_secret().to_string()),
            },
            google_authenticated: draft.google_authenticated,
            messaging: draft.messaging,
            email: draft.email.clone(),
            capabilities: draft.capabilities,
            wallets,
            active_wallet_id,
            guardrail_preset: guardrails.preset(),
            guardrails: *guardrails.bundle(),
        })
    }

    pub fn active_wallet(&self) -> Option<&WalletEntry> {
        let id = self.active_wallet_id.as_deref()?;
        self.wallets.iter().find(|w| w.id == id)
    }

    /// Scheduled email jobs only run with Google connected, email enabled,
    /// and the email capability on.
    pub fn email_jobs_enabled(&self) -> bool {
        self.google_authenticated && self.email.enabled && self.capabilities.email_intelligence
    }
}
