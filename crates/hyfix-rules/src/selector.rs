//! Target selection
//!
//! Provides [`TargetSelector`], the per-load predicate deciding which rules
//! apply to a unit. Exact names resolve through a hash map, prefix patterns
//! through a radix trie walked from the longest matching ancestor upwards.

use crate::rule::{Target, TransformRule};
use radix_trie::{Trie, TrieCommon};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered rules indexed by target name
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct TargetSelector {
    rules: Vec<Arc<dyn TransformRule>>,
    exact: HashMap<String, Vec<usize>>,
    prefixes: Trie<String, Vec<usize>>,
}

impl TargetSelector {
    /// Create empty selector
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            exact: HashMap::new(),
            prefixes: Trie::new(),
        }
    }

    /// Selector over `rules`, in the given order
    #[must_use]
    pub fn with_rules(rules: impl IntoIterator<Item = Arc<dyn TransformRule>>) -> Self {
        let mut selector = Self::new();
        for rule in rules {
            selector.register(rule);
        }
        selector
    }

    /// Register a rule; registration order is application order
    pub fn register(&mut self, rule: Arc<dyn TransformRule>) {
        let slot = self.rules.len();
        for target in rule.targets() {
            match target {
                Target::Exact(name) => {
                    if let Some(binary) = binary_form(&name) {
                        self.exact.entry(binary).or_default().push(slot);
                    }
                    self.exact.entry(name).or_default().push(slot);
                }
                Target::Prefix(prefix) => {
                    if let Some(binary) = binary_form(&prefix) {
                        self.add_prefix(binary, slot);
                    }
                    self.add_prefix(prefix, slot);
                }
            }
        }
        tracing::debug!(rule = rule.id(), slot, "registered rule");
        self.rules.push(rule);
    }

    fn add_prefix(&mut self, prefix: String, slot: usize) {
        if let Some(slots) = self.prefixes.get_mut(&prefix) {
            slots.push(slot);
        } else {
            self.prefixes.insert(prefix, vec![slot]);
        }
    }

    /// Rules for `unit_name` (binary or internal form), in registration
    /// order; empty when nothing matches
    #[must_use]
    pub fn classify(&self, unit_name: &str) -> Vec<Arc<dyn TransformRule>> {
        let slots = self.slots(unit_name);
        slots.into_iter().map(|i| Arc::clone(&self.rules[i])).collect()
    }

    /// Whether any rule targets `unit_name`
    ///
    /// Targets are indexed in both name forms, so only names mixing `.` and
    /// `/` are normalized first; everything else is looked up as given.
    #[must_use]
    pub fn is_candidate(&self, unit_name: &str) -> bool {
        let name = if unit_name.contains('.') && unit_name.contains('/') {
            normalize(unit_name)
        } else {
            Cow::Borrowed(unit_name)
        };
        self.exact.contains_key(name.as_ref())
            || (!self.prefixes.is_empty() && self.prefixes.get_ancestor(name.as_ref()).is_some())
    }

    fn slots(&self, unit_name: &str) -> Vec<usize> {
        let name = normalize(unit_name);
        let name = name.as_ref();
        let mut slots: Vec<usize> = self.exact.get(name).cloned().unwrap_or_default();

        // get_ancestor yields the longest registered prefix; shorten the key
        // past it to reach the next one
        let mut end = name.len();
        while end > 0 && !self.prefixes.is_empty() {
            let Some(node) = self.prefixes.get_ancestor(&name[..end]) else {
                break;
            };
            let Some(key) = node.key() else {
                break;
            };
            if let Some(found) = node.value() {
                slots.extend(found);
            }
            end = key.len().saturating_sub(1);
            while end > 0 && !name.is_char_boundary(end) {
                end -= 1;
            }
        }

        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// All registered rules, in registration order
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn TransformRule>] {
        &self.rules
    }

    /// Get number of registered rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rule is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn normalize(unit_name: &str) -> Cow<'_, str> {
    if unit_name.contains('.') {
        Cow::Owned(unit_name.replace('.', "/"))
    } else {
        Cow::Borrowed(unit_name)
    }
}

/// `a.b.C` for `a/b/C`; `None` when both forms coincide
fn binary_form(internal: &str) -> Option<String> {
    internal.contains('/').then(|| internal.replace('/', "."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::rule::RuleEffect;
    use hyfix_classfile::ClassFile;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Fixed(&'static str, Vec<Target>);

    impl TransformRule for Fixed {
        fn id(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "test rule"
        }

        fn targets(&self) -> Vec<Target> {
            self.1.clone()
        }

        fn apply(&self, _class: &mut ClassFile) -> Result<RuleEffect, RuleError> {
            Ok(RuleEffect::AlreadyApplied)
        }
    }

    fn rule(id: &'static str, targets: Vec<Target>) -> Arc<dyn TransformRule> {
        Arc::new(Fixed(id, targets))
    }

    fn ids(rules: &[Arc<dyn TransformRule>]) -> Vec<&'static str> {
        rules.iter().map(|r| r.id()).collect()
    }

    fn selector() -> TargetSelector {
        TargetSelector::with_rules([
            rule("bed", vec![Target::exact("world.BedManager")]),
            rule("inner", vec![Target::prefix("world.BedManager$")]),
            rule("world", vec![Target::prefix("world/")]),
            rule("bed-again", vec![Target::exact("world/BedManager")]),
        ])
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let selector = TargetSelector::new();
        assert!(selector.is_empty());
        assert!(selector.classify("a.B").is_empty());
        assert!(!selector.is_candidate("a.B"));
    }

    #[test]
    fn exact_and_prefix_in_registration_order() {
        let selector = selector();
        assert_eq!(
            ids(&selector.classify("world.BedManager")),
            vec!["bed", "world", "bed-again"]
        );
        assert_eq!(
            ids(&selector.classify("world/BedManager$1")),
            vec!["inner", "world"]
        );
        assert_eq!(ids(&selector.classify("world.UnrelatedSystem")), vec!["world"]);
    }

    #[test]
    fn unmatched_names_yield_nothing() {
        let selector = selector();
        assert!(selector.classify("other.BedManager").is_empty());
        assert!(selector.classify("").is_empty());
        assert!(!selector.is_candidate("java.lang.String"));
        assert!(selector.is_candidate("world.BedManager"));
    }

    #[test]
    fn shared_prefix_slot() {
        let selector = TargetSelector::with_rules([
            rule("a", vec![Target::prefix("x/")]),
            rule("b", vec![Target::prefix("x/")]),
        ]);
        assert_eq!(ids(&selector.classify("x/Y")), vec!["a", "b"]);
    }

    #[test]
    fn candidate_lookup_in_either_form() {
        let selector = TargetSelector::with_rules([
            rule("bed", vec![Target::exact("world/BedManager")]),
            rule("world", vec![Target::prefix("world/gen/")]),
        ]);
        assert!(selector.is_candidate("world/BedManager"));
        assert!(selector.is_candidate("world.BedManager"));
        assert!(selector.is_candidate("world.gen.Noise"));
        assert!(selector.is_candidate("world/gen.Noise"));
        assert!(!selector.is_candidate("world.BedManagerX.y"));
        assert!(!selector.is_candidate("world.Gen"));
        assert_eq!(ids(&selector.classify("world.BedManager")), vec!["bed"]);
    }

    proptest! {
        #[test]
        fn candidate_agrees_with_classify(name in "[a-zA-Z/$.]{0,24}") {
            let selector = selector();
            prop_assert_eq!(selector.is_candidate(&name), !selector.classify(&name).is_empty());
        }

        #[test]
        fn classify_agrees_with_matches(name in "[a-zA-Z/$.]{0,24}") {
            let selector = selector();
            let picked = ids(&selector.classify(&name));
            let expected: Vec<&str> = selector
                .rules()
                .iter()
                .filter(|r| r.matches(&name))
                .map(|r| r.id())
                .collect();
            prop_assert_eq!(picked, expected);
        }
    }
}
