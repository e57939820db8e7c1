//! Property tests for pool accounting under arbitrary operation sequences.

use ixsel::{
    AutoMl, AutoMlConfig, CbExample, ConfigManager, ConfigState, FeatureGroups, LoggedFeedback,
    Namespace, OracleType, RandState, SgdCbLearner,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Example touching the namespaces whose bits are set (a..=e).
    Example(u8),
    /// `n` observations on `slot` with challenger / champion rewards.
    Observe { slot: usize, r: f64, champ_r: f64, n: usize },
    Schedule,
    UpdateChamp,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..32).prop_map(Op::Example),
        (0usize..4, 0.0f64..=1.0, 0.0f64..=1.0, 1usize..40)
            .prop_map(|(slot, r, champ_r, n)| Op::Observe { slot, r, champ_r, n }),
        Just(Op::Schedule),
        Just(Op::UpdateChamp),
    ]
}

fn oracle() -> impl Strategy<Value = OracleType> {
    prop_oneof![
        Just(OracleType::OneDiff),
        Just(OracleType::Rand),
        Just(OracleType::ChampDupe),
    ]
}

fn example(mask: u8) -> CbExample {
    let mut shared = FeatureGroups::new();
    for (i, t) in (b'a'..=b'e').enumerate() {
        if mask & (1 << i) != 0 {
            shared.push(Namespace(t), i as u64, 1.0);
        }
    }
    CbExample::new(shared, vec![FeatureGroups::new(); 2])
}

fn assert_pool_ok(m: &ConfigManager) -> Result<(), TestCaseError> {
    prop_assert!(m.check_invariants().is_ok(), "{:?}", m.check_invariants());

    let live = m.configs().iter().filter(|c| c.state == ConfigState::Live).count();
    let removed = m.configs().iter().filter(|c| c.state == ConfigState::Removed).count();
    prop_assert!(live <= m.max_live_configs());
    prop_assert_eq!(m.index_queue().len() + live + removed, m.configs().len());

    let kept: Vec<_> = m
        .configs()
        .iter()
        .filter(|c| c.state != ConfigState::Removed && !c.allow_dups)
        .collect();
    for (i, a) in kept.iter().enumerate() {
        for b in &kept[i + 1..] {
            prop_assert_ne!(&a.exclusions, &b.exclusions);
        }
    }

    for slot in m.live_slots() {
        let pair = m.estimators()[slot].as_ref().unwrap();
        prop_assert_eq!(m.configs()[pair.config_index() as usize].state, ConfigState::Live);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Accounting and distinctness hold after every operation.
    #[test]
    fn pool_invariants_hold_under_random_ops(
        kind in oracle(),
        cap in 1usize..5,
        seed in any::<u64>(),
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let cfg = AutoMlConfig::default()
            .with_max_live_configs(cap)
            .with_eval_horizon(5)
            .with_global_lease(3)
            .with_oracle(kind)
            .with_weight_bits(4)
            .with_seed(seed);
        let mut m = ConfigManager::new(&cfg, ixsel::priority_none, RandState::new(seed)).unwrap();

        for op in ops {
            match op {
                Op::Example(mask) => {
                    m.pre_process(&example(mask));
                }
                Op::Observe { slot, r, champ_r, n } => {
                    if let Some(Some(pair)) = m.estimators_mut().get_mut(slot) {
                        for _ in 0..n {
                            pair.observe(1.0, r);
                            pair.observe_champion(false, 1.0, champ_r);
                        }
                    }
                }
                Op::Schedule => m.schedule().unwrap(),
                Op::UpdateChamp => {
                    let before = m.total_champ_switches();
                    let swapped = m.update_champ().unwrap();
                    prop_assert_eq!(m.total_champ_switches(), before + swapped as u64);
                    if swapped {
                        for slot in 1..m.max_live_configs() {
                            prop_assert!(m.weights().slot_is_zero(slot));
                        }
                    }
                }
            }
            assert_pool_ok(&m)?;
        }
    }

    /// Namespace counts never decrease.
    #[test]
    fn namespace_counts_are_monotone(masks in prop::collection::vec(1u8..32, 1..40)) {
        let cfg = AutoMlConfig::default().with_weight_bits(4);
        let mut m = ConfigManager::new(&cfg, ixsel::priority_none, RandState::new(0)).unwrap();
        let mut prev = m.ns_counter().clone();
        for mask in masks {
            m.pre_process(&example(mask));
            for (ns, c) in &prev {
                prop_assert!(m.ns_counter()[ns] >= *c);
            }
            prev = m.ns_counter().clone();
        }
    }

    /// Whole-driver runs stay consistent and deterministic per seed.
    #[test]
    fn driver_runs_are_deterministic(
        seed in any::<u64>(),
        costs in prop::collection::vec((0.0f32..=1.0, 0usize..2, 1u8..32), 1..80),
    ) {
        let cfg = AutoMlConfig::default()
            .with_max_live_configs(3)
            .with_eval_horizon(4)
            .with_collect_stable_examples(2)
            .with_oracle(OracleType::Rand)
            .with_weight_bits(6)
            .with_seed(seed);
        let run = || {
            let mut aml = AutoMl::new(cfg.clone()).unwrap();
            let mut base = SgdCbLearner::default();
            let mut outs = Vec::new();
            for (cost, action, mask) in &costs {
                let mut ex = example(*mask);
                let logged = LoggedFeedback { cost: *cost, probability: 0.5 };
                outs.push(aml.one_step(&mut base, &mut ex, &logged, *action).unwrap());
            }
            (outs, aml.metrics())
        };
        let a = run();
        prop_assert_eq!(&a, &run());
    }
}
