//! Synthetic stream where only one interaction carries signal.
//!
//! Costs depend on the product of the `u` (user) and `x` (action) features,
//! so the champion should converge to a configuration that keeps `ux` while
//! the other interactions are free to go.
//!
//! Run with `RUST_LOG=info cargo run --example stream_demo`.

use ixsel::{
    interactions_to_string, AutoMl, AutoMlConfig, CbExample, FeatureGroups, LoggedFeedback,
    Namespace, OracleType, SgdCbLearner,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn main() -> Result<(), ixsel::AutoMlError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AutoMlConfig::default()
        .with_max_live_configs(4)
        .with_eval_horizon(200)
        .with_oracle(OracleType::OneDiff)
        .with_weight_bits(14)
        .with_seed(7);
    let mut automl = AutoMl::with_host_options(cfg, ["cb_explore_adf"])?;
    let mut base = SgdCbLearner::default();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let n_actions = 3usize;
    let mut total_cost = 0.0f64;
    for t in 0..20_000usize {
        let user = rng.gen_range(0..4u64);
        let noise = rng.gen_range(0..16u64);
        let shared = FeatureGroups::new()
            .with(Namespace(b'u'), user, 1.0)
            .with(Namespace(b'n'), noise, 1.0)
            .with(Namespace(b'd'), (t % 7) as u64, 1.0);
        let actions = (0..n_actions)
            .map(|a| FeatureGroups::new().with(Namespace(b'x'), a as u64, 1.0))
            .collect();
        let mut ex = CbExample::new(shared, actions);

        let action = rng.gen_range(0..n_actions);
        let best = (user as usize) % n_actions;
        let cost = if action == best { 0.0 } else { 1.0 };
        total_cost += cost as f64;
        let logged = LoggedFeedback {
            cost,
            probability: 1.0 / n_actions as f32,
        };
        automl.one_step(&mut base, &mut ex, &logged, action)?;

        if (t + 1) % 5_000 == 0 {
            let m = automl.metrics();
            log::info!(
                "t={} state={} switches={} configs={} champion=[{}]",
                t + 1,
                m.state,
                m.total_champ_switches,
                m.config_count,
                m.champion_interactions
            );
            for s in &m.slots {
                log::info!(
                    "  slot {} cfg {} {} n={} ips={:.3} [{:.3}, {:.3}]",
                    s.slot,
                    s.config_index,
                    s.exclusions,
                    s.update_count,
                    s.ips,
                    s.lower_bound,
                    s.upper_bound
                );
            }
        }
    }

    println!(
        "logged mean cost {:.3}; final champion interactions: {}",
        total_cost / 20_000.0,
        interactions_to_string(automl.champion_interactions())
    );
    Ok(())
}
