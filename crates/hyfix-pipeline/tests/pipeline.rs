//! End-to-end load events through the interceptor with the built-in rules

use hyfix_classfile::validate::check_integrity;
use hyfix_classfile::ClassFile;
use hyfix_pipeline::{
    LoadInterceptor, MemorySink, Outcome, PartialFailurePolicy, PatchConfig, Route, RuleStatus,
};
use hyfix_rules::{RuleSettings, TransformerToggles};
use hyfix_test_utils as fixtures;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn interceptor_with(config: &PatchConfig) -> (LoadInterceptor, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (LoadInterceptor::from_config(config, sink.clone()), sink)
}

fn interceptor() -> (LoadInterceptor, Arc<MemorySink>) {
    interceptor_with(&PatchConfig::default())
}

fn targets() -> Vec<(String, Vec<u8>)> {
    [
        (fixtures::WORLD, fixtures::world()),
        (fixtures::TICKING_THREAD, fixtures::ticking_thread()),
        (fixtures::SPAWN_MARKER_ENTITY, fixtures::spawn_marker_entity()),
        (fixtures::PACKET_HANDLER, fixtures::packet_handler()),
        (fixtures::LIVING_ENTITY, fixtures::living_entity()),
        (fixtures::BED_MANAGER, fixtures::bed_manager(true)),
    ]
    .into_iter()
    .map(|(name, bytes)| (fixtures::binary_name(name), bytes))
    .collect()
}

#[test]
fn bed_manager_with_anchor_is_patched() {
    let (interceptor, sink) = interceptor();
    let input = fixtures::bed_manager(true);
    let delivery = interceptor.intercept("world.BedManager", &input);

    assert_eq!(delivery.outcome, Outcome::Patched);
    assert_eq!(delivery.route, Route::Transformed);
    let reparsed = ClassFile::parse(&delivery.bytes).unwrap();
    assert_eq!(reparsed.name().unwrap(), fixtures::BED_MANAGER);
    assert!(fixtures::has_insn(
        &delivery.bytes,
        "onBedBreak",
        "(Lworld/Location;)V",
        "invokestatic com/hyfixes/bridge/StructureMemory.rememberDestroyed:(Lworld/Location;)V",
    ));

    let unit = sink.records().pop().unwrap();
    assert_eq!(unit.outcome, Outcome::Patched);
    assert_eq!(unit.output_len, delivery.bytes.len());
    assert_ne!(unit.input_digest, unit.output_digest);
}

#[test]
fn bed_manager_without_anchor_falls_back() {
    let (interceptor, sink) = interceptor();
    let input = fixtures::bed_manager(false);
    let delivery = interceptor.intercept("world.BedManager", &input);

    assert_eq!(delivery.outcome, Outcome::Failed);
    assert_eq!(delivery.route, Route::FailedFallback);
    assert!(delivery.is_original());
    assert_eq!(&*delivery.bytes, input.as_slice());
    assert_eq!(delivery.error.as_ref().unwrap().kind(), "TargetPatternNotFound");

    let records = sink.for_unit(fixtures::BED_MANAGER);
    assert!(records.iter().any(|r| r.outcome == Outcome::Failed
        && r.rule.as_deref() == Some("respawnBlock")
        && r.error_kind.as_deref() == Some("TargetPatternNotFound")));
    let unit = records.last().unwrap();
    assert_eq!(unit.outcome, Outcome::Failed);
    assert_eq!(unit.error_kind.as_deref(), Some("TargetPatternNotFound"));
}

#[test]
fn unrelated_system_passes_through_without_records() {
    let (interceptor, sink) = interceptor();
    let input = fixtures::unrelated_system();
    let delivery = interceptor.intercept("world.UnrelatedSystem", &input);

    assert_eq!(delivery.outcome, Outcome::Passthrough);
    assert_eq!(delivery.route, Route::Passthrough);
    assert!(delivery.is_original());
    assert_eq!(&*delivery.bytes, input.as_slice());
    assert!(sink.is_empty());
}

#[test]
fn every_target_patches_to_a_valid_class() {
    let (interceptor, _) = interceptor();
    for (name, input) in targets() {
        let delivery = interceptor.intercept(&name, &input);
        assert_eq!(delivery.outcome, Outcome::Patched, "{name}: {:?}", delivery.error);
        let class = ClassFile::parse(&delivery.bytes).unwrap();
        let every: Vec<usize> = (0..class.methods.len()).collect();
        check_integrity(&class, &every).unwrap_or_else(|e| panic!("{name}: {e}"));
    }
    assert_eq!(interceptor.stats().patched, 6);
}

#[test]
fn second_pass_does_not_double_patch() {
    let (interceptor, _) = interceptor();
    for (name, input) in targets() {
        let once = interceptor.on_load(&name, &input).into_owned();
        let twice = interceptor.intercept(&name, &once);
        assert_eq!(twice.outcome, Outcome::Passthrough, "{name}");
        assert_eq!(twice.route, Route::Unchanged, "{name}");
        assert!(twice
            .rules
            .iter()
            .all(|r| r.status == RuleStatus::AlreadyApplied));
        assert_eq!(&*twice.bytes, once.as_slice(), "{name}");
    }
}

#[test]
fn repeated_runs_are_byte_identical() {
    let (first, _) = interceptor();
    let (second, _) = interceptor();
    for (name, input) in targets() {
        let a = first.on_load(&name, &input).into_owned();
        let b = second.on_load(&name, &input).into_owned();
        let c = first.on_load(&name, &input).into_owned();
        assert_eq!(a, b, "{name}");
        assert_eq!(a, c, "{name}");
    }
}

#[test]
fn disabled_rule_leaves_its_target_alone() {
    let config = PatchConfig {
        rules: RuleSettings {
            transformers: TransformerToggles {
                respawn_block: false,
                ..TransformerToggles::default()
            },
            ..RuleSettings::default()
        },
        ..PatchConfig::default()
    };
    let (interceptor, sink) = interceptor_with(&config);
    let input = fixtures::bed_manager(true);
    let delivery = interceptor.intercept("world.BedManager", &input);
    assert_eq!(delivery.route, Route::Passthrough);
    assert!(sink.is_empty());
}

#[test]
fn abort_policy_still_patches_clean_units() {
    let config = PatchConfig::default().with_policy(PartialFailurePolicy::AbortUnit);
    let (interceptor, _) = interceptor_with(&config);
    let input = fixtures::bed_manager(true);
    assert_eq!(
        interceptor.intercept("world.BedManager", &input).outcome,
        Outcome::Patched
    );
    let broken = fixtures::bed_manager(false);
    assert_eq!(
        interceptor.intercept("world.BedManager", &broken).outcome,
        Outcome::Failed
    );
}

#[test]
fn concurrent_loads_agree_with_serial_loads() {
    let (interceptor, sink) = interceptor();
    let interceptor = Arc::new(interceptor);
    let targets = Arc::new(targets());
    let expected: Vec<Vec<u8>> = targets
        .iter()
        .map(|(name, input)| interceptor.on_load(name, input).into_owned())
        .collect();
    let expected = Arc::new(expected);
    let records_before = sink.len();

    let threads = 8;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let interceptor = Arc::clone(&interceptor);
            let targets = Arc::clone(&targets);
            let expected = Arc::clone(&expected);
            std::thread::spawn(move || {
                let unrelated = fixtures::unrelated_system();
                for _ in 0..5 {
                    for ((name, input), want) in targets.iter().zip(expected.iter()) {
                        assert_eq!(interceptor.on_load(name, input).as_ref(), want.as_slice());
                    }
                    let out = interceptor.on_load("world.UnrelatedSystem", &unrelated);
                    assert_eq!(out.as_ref(), unrelated.as_slice());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = interceptor.stats();
    assert_eq!(stats.patched, 6 + 6 * 5 * threads);
    assert_eq!(stats.passthrough, 5 * threads);
    assert_eq!(stats.failed, 0);
    // one rule record and one unit record per patched load
    assert_eq!(sink.len() - records_before, 2 * 6 * 5 * threads as usize);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn unmatched_names_pass_through_unchanged(
        name in "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}\\.[A-Z][a-zA-Z]{0,12}",
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let (interceptor, sink) = interceptor();
        prop_assume!(interceptor.selector().classify(&name).is_empty());
        let delivery = interceptor.intercept(&name, &bytes);
        prop_assert_eq!(delivery.outcome, Outcome::Passthrough);
        prop_assert!(delivery.is_original());
        prop_assert_eq!(&*delivery.bytes, bytes.as_slice());
        prop_assert!(sink.is_empty());
    }

    #[test]
    fn matched_names_never_corrupt_garbage(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let (interceptor, _) = interceptor();
        let delivery = interceptor.intercept("world.BedManager", &bytes);
        prop_assert_eq!(delivery.outcome, Outcome::Failed);
        prop_assert_eq!(&*delivery.bytes, bytes.as_slice());
    }
}
