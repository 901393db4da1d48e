//! Rule settings
//!
//! The serde shape matches the `transformers` and `interactionTimeout`
//! sections of the plugin's `config.json`. Every field has a default, and
//! toggles for transformers this build does not ship are ignored.

use serde::{Deserialize, Serialize};

/// Per-rule enable switches, keyed by rule id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformerToggles {
    pub world: bool,
    pub ticking_thread: bool,
    pub spawn_marker_entity: bool,
    pub interaction_timeout: bool,
    pub living_entity: bool,
    pub respawn_block: bool,
}

impl Default for TransformerToggles {
    fn default() -> Self {
        Self {
            world: true,
            ticking_thread: true,
            spawn_marker_entity: true,
            interaction_timeout: true,
            living_entity: true,
            respawn_block: true,
        }
    }
}

impl TransformerToggles {
    /// Is the rule with this id enabled; unknown ids are disabled
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        match id {
            "world" => self.world,
            "tickingThread" => self.ticking_thread,
            "spawnMarkerEntity" => self.spawn_marker_entity,
            "interactionTimeout" => self.interaction_timeout,
            "livingEntity" => self.living_entity,
            "respawnBlock" => self.respawn_block,
            _ => false,
        }
    }

    /// All toggles off
    #[must_use]
    pub fn none() -> Self {
        Self {
            world: false,
            ticking_thread: false,
            spawn_marker_entity: false,
            interaction_timeout: false,
            living_entity: false,
            respawn_block: false,
        }
    }
}

/// Timeout formula `ping * pingMultiplier + baseTimeoutMs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionTimeoutSettings {
    pub base_timeout_ms: i64,
    pub ping_multiplier: f64,
    /// Replace the whole computation with this constant
    pub fixed_timeout_ms: Option<i64>,
}

impl Default for InteractionTimeoutSettings {
    fn default() -> Self {
        Self {
            base_timeout_ms: 6000,
            ping_multiplier: 4.0,
            fixed_timeout_ms: None,
        }
    }
}

impl InteractionTimeoutSettings {
    /// Reason these settings are unusable, if any
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        if !self.ping_multiplier.is_finite() || self.ping_multiplier < 0.0 {
            return Some(format!(
                "pingMultiplier must be a non-negative number, got {}",
                self.ping_multiplier
            ));
        }
        if self.base_timeout_ms < 0 {
            return Some(format!(
                "baseTimeoutMs must not be negative, got {}",
                self.base_timeout_ms
            ));
        }
        match self.fixed_timeout_ms {
            Some(fixed) if fixed < 0 => {
                Some(format!("fixedTimeoutMs must not be negative, got {fixed}"))
            }
            _ => None,
        }
    }
}

/// Everything the built-in rule set reads from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSettings {
    pub transformers: TransformerToggles,
    pub interaction_timeout: InteractionTimeoutSettings,
}
