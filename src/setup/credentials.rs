//! Credential collection and local validation.
//!
//! Every check here is a pure function over the raw string. The only network
//! call in this module is [`probe_key_liveness`], which callers opt into for
//! the primary provider.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, ValidationError};

/// Inference providers the wizard offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Venice,
    #[serde(rename = "nearai")]
    NearAi,
    Ollama,
}

impl LlmProvider {
    pub const ALL: [LlmProvider; 5] = [
        Self::Anthropic,
        Self::OpenAi,
        Self::Venice,
        Self::NearAi,
        Self::Ollama,
    ];

    /// Canonical id written into the agent configuration.
    pub fn id(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Venice => "venice",
            Self::NearAi => "nearai",
            Self::Ollama => "ollama",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic (Claude)",
            Self::OpenAi => "OpenAI",
            Self::Venice => "Venice (private inference)",
            Self::NearAi => "NEAR AI",
            Self::Ollama => "Ollama (local)",
        }
    }

    /// The credential this provider needs, or `None` for local-only providers.
    pub fn credential(self) -> Option<CredentialKind> {
        match self {
            Self::Anthropic => Some(CredentialKind::AnthropicKey),
            Self::OpenAi => Some(CredentialKind::OpenAiKey),
            Self::Venice => Some(CredentialKind::VeniceKey),
            Self::NearAi => Some(CredentialKind::NearAiKey),
            Self::Ollama => None,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "open_ai" => Some(Self::OpenAi),
            "venice" => Some(Self::Venice),
            "nearai" | "near_ai" => Some(Self::NearAi),
            "ollama" | "local" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Every secret or identifier the wizard collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    AnthropicKey,
    #[serde(rename = "openai_key")]
    OpenAiKey,
    VeniceKey,
    #[serde(rename = "nearai_key")]
    NearAiKey,
    PerplexityKey,
    TelegramToken,
    SlackToken,
    #[serde(rename = "whatsapp_phone")]
    WhatsAppPhone,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 8] = [
        Self::AnthropicKey,
        Self::OpenAiKey,
        Self::VeniceKey,
        Self::NearAiKey,
        Self::PerplexityKey,
        Self::TelegramToken,
        Self::SlackToken,
        Self::WhatsAppPhone,
    ];

    /// Order in which pasted values are matched. First match wins, so the
    /// narrower `sk-ant-` shape must come before the generic `sk-` shape.
    const PASTE_ORDER: [CredentialKind; 6] = [
        Self::AnthropicKey,
        Self::PerplexityKey,
        Self::OpenAiKey,
        Self::TelegramToken,
        Self::SlackToken,
        Self::WhatsAppPhone,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            Self::AnthropicKey => "anthropic_key",
            Self::OpenAiKey => "openai_key",
            Self::VeniceKey => "venice_key",
            Self::NearAiKey => "nearai_key",
            Self::PerplexityKey => "perplexity_key",
            Self::TelegramToken => "telegram_token",
            Self::SlackToken => "slack_token",
            Self::WhatsAppPhone => "whatsapp_phone",
        }
    }

    pub fn from_field_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.field_name() == name)
    }

    /// Inline hint shown next to an invalid field.
    pub fn format_hint(self) -> &'static str {
        match self {
            Self::AnthropicKey => "expected an Anthropic key starting with sk-ant-",
            Self::OpenAiKey => "expected an OpenAI key starting with sk-",
            Self::VeniceKey => "expected a Venice API key (at least 20 characters, no spaces)",
            Self::NearAiKey => "expected a NEAR AI API key (at least 20 characters, no spaces)",
            Self::PerplexityKey => "expected a Perplexity key starting with pplx-",
            Self::TelegramToken => "expected a BotFather token like 123456789:AA...",
            Self::SlackToken => "expected a Slack token starting with xoxb- or xoxp-",
            Self::WhatsAppPhone => "expected an international number like +447700900123",
        }
    }

    /// Whether the value has a shape distinctive enough to auto-route a paste.
    fn matches_shape(self, value: &str) -> bool {
        match self {
            Self::VeniceKey | Self::NearAiKey => false,
            other => is_valid(other, value),
        }
    }
}

static TELEGRAM_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{6,12}:[A-Za-z0-9_-]{30,}$").expect("telegram token regex")
});
static SLACK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^xox[bp]-[A-Za-z0-9-]{10,}$").expect("slack token regex"));
static E164_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("phone regex"));

fn is_opaque_token(value: &str, min_len: usize) -> bool {
    value.len() >= min_len && !value.chars().any(char::is_whitespace)
}

/// Local format check for a credential value. Pure and deterministic.
pub fn is_valid(kind: CredentialKind, value: &str) -> bool {
    let value = value.trim();
    match kind {
        CredentialKind::AnthropicKey => {
            value.starts_with("sk-ant-") && value.len() > 20 && is_opaque_token(value, 21)
        }
        CredentialKind::OpenAiKey => {
            value.starts_with("sk-")
                && !value.starts_with("sk-ant-")
                && value.len() > 20
                && is_opaque_token(value, 21)
        }
        CredentialKind::PerplexityKey => value.starts_with("pplx-") && is_opaque_token(value, 21),
        CredentialKind::VeniceKey | CredentialKind::NearAiKey => is_opaque_token(value, 20),
        CredentialKind::TelegramToken => TELEGRAM_TOKEN.is_match(value),
        CredentialKind::SlackToken => SLACK_TOKEN.is_match(value),
        CredentialKind::WhatsAppPhone => E164_PHONE.is_match(&normalize_phone(value)),
    }
}

/// Strip spaces, dashes, and parentheses people paste along with phone numbers.
pub fn normalize_phone(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// One collected value plus its validity predicate result.
#[derive(Debug)]
pub struct CredentialField {
    kind: CredentialKind,
    raw: SecretString,
    valid: bool,
}

impl CredentialField {
    pub fn new(kind: CredentialKind, value: &str) -> Self {
        let value = match kind {
            CredentialKind::WhatsAppPhone => normalize_phone(value),
            _ => value.trim().to_string(),
        };
        let valid = is_valid(kind, &value);
        Self {
            kind,
            raw: SecretString::from(value),
            valid,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_empty(&self) -> bool {
        self.raw.expose_secret().is_empty()
    }

    /// The value, only when its local check passed.
    pub fn validated(&self) -> Option<&SecretString> {
        self.valid.then_some(&self.raw)
    }
}

/// Result of routing a pasted clipboard value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteOutcome {
    /// Stored in the field whose shape matched.
    Routed(CredentialKind),
    /// Stored in the focused field because no known shape matched.
    Focused(CredentialKind),
    /// The target field already held a value and was left alone.
    AlreadyPopulated(CredentialKind),
    /// Nothing usable was pasted.
    Ignored,
}

/// Credential values held in memory until the commit succeeds.
#[derive(Debug, Default)]
pub struct CredentialDraft {
    fields: BTreeMap<CredentialKind, CredentialField>,
}

impl CredentialDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or clear, with an empty value) a field.
    pub fn set(&mut self, kind: CredentialKind, value: &str) {
        let field = CredentialField::new(kind, value);
        if field.is_empty() {
            self.fields.remove(&kind);
        } else {
            tracing::debug!(
                field = kind.field_name(),
                len = value.trim().len(),
                valid = field.is_valid(),
                "Credential updated"
            );
            self.fields.insert(kind, field);
        }
    }

    pub fn get(&self, kind: CredentialKind) -> Option<&CredentialField> {
        self.fields.get(&kind)
    }

    pub fn is_populated(&self, kind: CredentialKind) -> bool {
        self.fields.contains_key(&kind)
    }

    /// The value of a field only if it passed its local check.
    pub fn validated(&self, kind: CredentialKind) -> Option<&SecretString> {
        self.fields.get(&kind).and_then(CredentialField::validated)
    }

    /// Route a pasted value to the field whose shape it matches.
    ///
    /// Only the first line is considered. The first matching shape wins; a
    /// value that matches nothing lands in the focused field. Populated fields
    /// are never overwritten.
    pub fn route_paste(&mut self, focused: CredentialKind, pasted: &str) -> PasteOutcome {
        let clean = pasted.split(['\r', '\n']).next().unwrap_or("").trim();
        if clean.is_empty() {
            return PasteOutcome::Ignored;
        }

        let matched = CredentialKind::PASTE_ORDER
            .into_iter()
            .find(|kind| kind.matches_shape(clean));

        let target = matched.unwrap_or(focused);
        if self.is_populated(target) {
            tracing::debug!(field = target.field_name(), "Paste skipped, field already populated");
            return PasteOutcome::AlreadyPopulated(target);
        }

        self.set(target, clean);
        match matched {
            Some(kind) => PasteOutcome::Routed(kind),
            None => PasteOutcome::Focused(focused),
        }
    }

    /// Inline errors for every populated field that fails its check.
    pub fn field_errors(&self) -> Vec<FieldError> {
        self.fields
            .values()
            .filter(|field| !field.is_valid())
            .map(|field| FieldError::new(field.kind.field_name(), field.kind.format_hint()))
            .collect()
    }

    /// Check the draft is ready to forward for the given primary provider.
    pub fn check_ready(&self, primary: LlmProvider) -> Result<(), ValidationError> {
        if let Some(kind) = primary.credential()
            && self.validated(kind).is_none()
            && !self.is_populated(kind)
        {
            return Err(ValidationError::MissingPrimaryKey(primary.display_name()));
        }
        let errors = self.field_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Fields(errors))
        }
    }

    /// Drop every held value. Secrets are zeroized on drop.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Outcome of the optional "does this key work" probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLiveness {
    Valid,
    Rejected,
    /// The provider could not be reached; says nothing about the key.
    Unreachable(String),
    /// The provider has no remote probe, or needs no key.
    NotChecked,
}

/// Ask the primary provider whether the key is accepted.
pub async fn probe_key_liveness(provider: LlmProvider, key: &SecretString) -> KeyLiveness {
    let request = match provider {
        LlmProvider::Anthropic => reqwest::Client::new()
            .get("https://api.anthropic.com/v1/models")
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", "2023-06-01"),
        LlmProvider::OpenAi => reqwest::Client::new()
            .get("https://api.openai.com/v1/models")
            .bearer_auth(key.expose_secret()),
        LlmProvider::Venice | LlmProvider::NearAi | LlmProvider::Ollama => {
            return KeyLiveness::NotChecked;
        }
    };

    match request.timeout(Duration::from_secs(5)).send().await {
        Ok(resp) if resp.status().is_success() => KeyLiveness::Valid,
        Ok(resp)
            if resp.status() == reqwest::StatusCode::UNAUTHORIZED
                || resp.status() == reqwest::StatusCode::FORBIDDEN =>
        {
            KeyLiveness::Rejected
        }
        Ok(resp) => KeyLiveness::Unreachable(format!("HTTP {}", resp.status().as_u16())),
        Err(e) => KeyLiveness::Unreachable(e.to_string()),
    }
}
