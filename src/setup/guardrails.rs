//! Guardrail presets.
//!
//! A preset name resolves to a complete [`GuardrailBundle`], preferably from
//! the bridge and otherwise from [`fallback_bundle`]. Bridge failures are
//! absorbed here and never reach the user.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::bridge::NativeBridge;
use crate::error::{FieldError, ValidationError};

/// Named risk presets. Exactly one is selected at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPreset {
    Conservative,
    Balanced,
    Autonomous,
    Custom,
}

impl SecurityPreset {
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "autonomous" => Ok(Self::Autonomous),
            "custom" => Ok(Self::Custom),
            _ => Err(ValidationError::UnknownPreset(name.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Autonomous => "autonomous",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SecurityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric risk limits the external agent enforces on financial operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardrailBundle {
    pub max_transaction_usd: f64,
    pub daily_loss_percent: f64,
    pub weekly_loss_percent: f64,
    pub daily_tx_limit: u32,
    pub require_confirmation: bool,
    pub max_slippage_percent: f64,
    pub max_concentration_percent: f64,
    pub min_health_factor: f64,
}

impl GuardrailBundle {
    /// Check the limits for internal consistency.
    ///
    /// Built-in presets always pass; this matters for Custom edits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if !(self.max_transaction_usd.is_finite() && self.max_transaction_usd > 0.0) {
            errors.push(FieldError::new(
                "max_transaction_usd",
                "must be a positive amount",
            ));
        }
        for (field, value) in [
            ("daily_loss_percent", self.daily_loss_percent),
            ("weekly_loss_percent", self.weekly_loss_percent),
            ("max_slippage_percent", self.max_slippage_percent),
            ("max_concentration_percent", self.max_concentration_percent),
        ] {
            if !(value.is_finite() && value > 0.0 && value <= 100.0) {
                errors.push(FieldError::new(field, "must be between 0 and 100"));
            }
        }
        if self.daily_loss_percent > self.weekly_loss_percent {
            errors.push(FieldError::new(
                "daily_loss_percent",
                "cannot exceed the weekly loss limit",
            ));
        }
        if self.daily_tx_limit == 0 {
            errors.push(FieldError::new("daily_tx_limit", "must allow at least one"));
        }
        if !(self.min_health_factor.is_finite() && self.min_health_factor >= 1.0) {
            errors.push(FieldError::new("min_health_factor", "must be at least 1.0"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Fields(errors))
        }
    }
}

/// Hardcoded table used when the bridge cannot resolve a preset.
///
/// `Custom` starts from the Balanced values.
pub fn fallback_bundle(preset: SecurityPreset) -> GuardrailBundle {
    match preset {
        SecurityPreset::Conservative => GuardrailBundle {
            max_transaction_usd: 100.0,
            daily_loss_percent: 2.0,
            weekly_loss_percent: 5.0,
            daily_tx_limit: 10,
            require_confirmation: true,
            max_slippage_percent: 1.0,
            max_concentration_percent: 25.0,
            min_health_factor: 2.0,
        },
        SecurityPreset::Balanced | SecurityPreset::Custom => GuardrailBundle {
            max_transaction_usd: 500.0,
            daily_loss_percent: 5.0,
            weekly_loss_percent: 15.0,
            daily_tx_limit: 20,
            require_confirmation: false,
            max_slippage_percent: 2.0,
            max_concentration_percent: 40.0,
            min_health_factor: 1.5,
        },
        SecurityPreset::Autonomous => GuardrailBundle {
            max_transaction_usd: 1_000_000.0,
            daily_loss_percent: 100.0,
            weekly_loss_percent: 100.0,
            daily_tx_limit: 1000,
            require_confirmation: false,
            max_slippage_percent: 50.0,
            max_concentration_percent: 100.0,
            min_health_factor: 1.0,
        },
    }
}

/// The wizard's current guardrail choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSelection {
    preset: SecurityPreset,
    bundle: GuardrailBundle,
}

impl Default for GuardrailSelection {
    fn default() -> Self {
        Self {
            preset: SecurityPreset::Balanced,
            bundle: fallback_bundle(SecurityPreset::Balanced),
        }
    }
}

impl GuardrailSelection {
    pub fn preset(&self) -> SecurityPreset {
        self.preset
    }

    pub fn bundle(&self) -> &GuardrailBundle {
        &self.bundle
    }

    /// Switch to Custom, keeping the current numbers as the editable starting point.
    pub fn freeze_as_custom(&mut self) {
        self.preset = SecurityPreset::Custom;
    }

    /// Edit the bundle directly. Only allowed while Custom is selected.
    pub fn edit_custom(
        &mut self,
        edit: impl FnOnce(&mut GuardrailBundle),
    ) -> Result<(), ValidationError> {
        if self.preset != SecurityPreset::Custom {
            return Err(ValidationError::PresetNotCustom);
        }
        edit(&mut self.bundle);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.bundle.validate()
    }

    fn select(&mut self, preset: SecurityPreset, bundle: GuardrailBundle) {
        self.preset = preset;
        self.bundle = bundle;
    }
}

/// Resolves presets through the bridge, falling back to the local table.
///
/// The first bundle resolved for a preset is remembered for the life of the
/// resolver so repeated applications are deterministic.
pub struct PresetResolver {
    bridge: Arc<dyn NativeBridge>,
    resolved: RwLock<HashMap<SecurityPreset, GuardrailBundle>>,
}

impl PresetResolver {
    pub fn new(bridge: Arc<dyn NativeBridge>) -> Self {
        Self {
            bridge,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a named preset to its bundle. Never fails for a known preset.
    pub async fn resolve(&self, preset: SecurityPreset) -> GuardrailBundle {
        if let Some(bundle) = self.resolved.read().await.get(&preset) {
            return *bundle;
        }

        let bundle = match self.bridge.resolve_guardrail_preset(preset).await {
            Ok(bundle) if bundle.validate().is_ok() => bundle,
            Ok(_) => {
                tracing::debug!(%preset, "Bridge returned inconsistent preset, using fallback");
                fallback_bundle(preset)
            }
            Err(e) => {
                tracing::debug!(%preset, "Preset resolution unavailable, using fallback: {}", e);
                fallback_bundle(preset)
            }
        };

        *self.resolved.write().await.entry(preset).or_insert(bundle)
    }

    /// Apply a preset by name to the selection.
    ///
    /// `custom` freezes the current bundle for direct editing instead of
    /// replacing it.
    pub async fn apply_preset(
        &self,
        selection: &mut GuardrailSelection,
        name: &str,
    ) -> Result<(), ValidationError> {
        let preset = SecurityPreset::parse(name)?;
        if preset == SecurityPreset::Custom {
            selection.freeze_as_custom();
            return Ok(());
        }
        let bundle = self.resolve(preset).await;
        selection.select(preset, bundle);
        tracing::info!(%preset, "Applied guardrail preset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_names_case_insensitively() {
        assert_eq!(
            SecurityPreset::parse(" Conservative ").unwrap(),
            SecurityPreset::Conservative
        );
        assert_eq!(
            SecurityPreset::parse("custom").unwrap(),
            SecurityPreset::Custom
        );
        assert!(matches!(
            SecurityPreset::parse("yolo"),
            Err(ValidationError::UnknownPreset(name)) if name == "yolo"
        ));
    }

    #[test]
    fn every_builtin_preset_is_internally_consistent() {
        for preset in [
            SecurityPreset::Conservative,
            SecurityPreset::Balanced,
            SecurityPreset::Autonomous,
            SecurityPreset::Custom,
        ] {
            fallback_bundle(preset)
                .validate()
                .unwrap_or_else(|e| panic!("{preset} should validate: {e}"));
        }
    }

    #[test]
    fn validate_flags_daily_above_weekly_and_low_health_factor() {
        let mut bundle = fallback_bundle(SecurityPreset::Balanced);
        bundle.daily_loss_percent = 20.0;
        bundle.min_health_factor = 0.8;

        let Err(ValidationError::Fields(errors)) = bundle.validate() else {
            panic!("expected field errors");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"daily_loss_percent"));
        assert!(fields.contains(&"min_health_factor"));
    }

    #[test]
    fn edit_requires_custom() {
        let mut selection = GuardrailSelection::default();
        assert_eq!(
            selection.edit_custom(|b| b.daily_tx_limit = 3),
            Err(ValidationError::PresetNotCustom)
        );

        selection.freeze_as_custom();
        selection.edit_custom(|b| b.daily_tx_limit = 3).unwrap();
        assert_eq!(selection.preset(), SecurityPreset::Custom);
        assert_eq!(selection.bundle().daily_tx_limit, 3);
        // The rest of the frozen bundle is untouched.
        assert_eq!(selection.bundle().max_transaction_usd, 500.0);
    }
}
