//! Built-in rule set
//!
//! One rule per host defect. Registration order is fixed and is the order
//! rules run in when several target the same class.

mod interaction_timeout;
mod living_entity;
mod respawn_block;
mod spawn_marker;
mod support;
mod ticking_thread;
mod world;

pub use interaction_timeout::InteractionTimeoutRule;
pub use living_entity::LivingEntityRule;
pub use respawn_block::RespawnBlockRule;
pub use spawn_marker::SpawnMarkerEntityRule;
pub use ticking_thread::TickingThreadRule;
pub use world::WorldAddPlayerRule;

use crate::rule::TransformRule;
use crate::settings::RuleSettings;
use std::sync::Arc;

/// Ids of every built-in rule, in registration order
pub const BUILTIN_IDS: [&str; 6] = [
    "world",
    "tickingThread",
    "spawnMarkerEntity",
    "interactionTimeout",
    "livingEntity",
    "respawnBlock",
];

/// Enabled built-in rules, in registration order
#[must_use]
pub fn builtin_rules(settings: &RuleSettings) -> Vec<Arc<dyn TransformRule>> {
    let all: [Arc<dyn TransformRule>; 6] = [
        Arc::new(WorldAddPlayerRule::new()),
        Arc::new(TickingThreadRule::new()),
        Arc::new(SpawnMarkerEntityRule::new()),
        Arc::new(InteractionTimeoutRule::new(
            settings.interaction_timeout.clone(),
        )),
        Arc::new(LivingEntityRule::new()),
        Arc::new(RespawnBlockRule::new()),
    ];
    let enabled: Vec<Arc<dyn TransformRule>> = all
        .into_iter()
        .filter(|rule| settings.transformers.is_enabled(rule.id()))
        .collect();
    tracing::debug!(
        enabled = enabled.len(),
        total = BUILTIN_IDS.len(),
        "built-in rules selected"
    );
    enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TransformerToggles;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_settings_enable_everything_in_order() {
        let ids: Vec<&str> = builtin_rules(&RuleSettings::default())
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, BUILTIN_IDS.to_vec());
    }

    #[test]
    fn disabled_rules_are_not_registered() {
        let settings = RuleSettings {
            transformers: TransformerToggles {
                ticking_thread: false,
                respawn_block: false,
                ..TransformerToggles::default()
            },
            ..RuleSettings::default()
        };
        let ids: Vec<&str> = builtin_rules(&settings).iter().map(|r| r.id()).collect();
        assert_eq!(
            ids,
            vec!["world", "spawnMarkerEntity", "interactionTimeout", "livingEntity"]
        );

        let none = RuleSettings {
            transformers: TransformerToggles::none(),
            ..RuleSettings::default()
        };
        assert!(builtin_rules(&none).is_empty());
    }

    #[test]
    fn every_builtin_id_has_a_toggle() {
        let all = TransformerToggles::default();
        let none = TransformerToggles::none();
        for id in BUILTIN_IDS {
            assert!(all.is_enabled(id), "{id}");
            assert!(!none.is_enabled(id), "{id}");
        }
    }
}
