//! Per-example driver: the "front door" for a host learner.
//!
//! [`AutoMl`] owns the [`ConfigManager`] and exposes one call per example:
//!
//! ```text
//! let scores = automl.one_step(&mut base, &mut example, &logged, logged_action)?;
//! ```
//!
//! Lifecycle:
//!
//! 1. **Collecting**: namespace statistics are gathered while the champion
//!    alone learns. Once `collect_stable_examples` consecutive examples bring
//!    no new namespace, the driver moves on.
//! 2. **Experimenting**: every `update_interval` examples the manager
//!    schedules challengers and tests them against the champion. There is no
//!    way back to Collecting.

use std::fmt;

use crate::persist::{read_u64, read_u8, write_u64, write_u8};
use crate::{
    reward_from_cost, ActionScores, AutoMlConfig, AutoMlError, BaseLearner, CbExample,
    ConfigManager, Interaction, LoggedFeedback, ModelBuffer, PriorityFn, RandState, MAX_CONFIGS,
};

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AutoMlState {
    #[default]
    Collecting,
    Experimenting,
}

impl AutoMlState {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoMlState::Collecting => "Collecting",
            AutoMlState::Experimenting => "Experimenting",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            AutoMlState::Collecting => 0,
            AutoMlState::Experimenting => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self, AutoMlError> {
        match v {
            0 => Ok(AutoMlState::Collecting),
            1 => Ok(AutoMlState::Experimenting),
            x => Err(AutoMlError::decode(format!("unknown automl state {x}"))),
        }
    }
}

impl fmt::Display for AutoMlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Diagnostic view of one live slot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotMetrics {
    pub slot: usize,
    pub config_index: usize,
    pub lease: u64,
    pub update_count: u64,
    pub ips: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub eligible_to_inactivate: bool,
    /// Rendered exclusion set, e.g. `{ab,bb}`.
    pub exclusions: String,
    pub interaction_count: usize,
}

/// Point-in-time snapshot for logging or export.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoMlMetrics {
    pub state: AutoMlState,
    pub total_learn_count: u64,
    pub total_champ_switches: u64,
    pub champion: usize,
    pub champion_interactions: String,
    pub config_count: usize,
    pub queue_len: usize,
    pub namespace_count: usize,
    pub slots: Vec<SlotMetrics>,
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug, Clone)]
pub struct AutoMl {
    cfg: AutoMlConfig,
    state: AutoMlState,
    cm: ConfigManager,
    examples_since_new_ns: u64,
    buffer: Vec<(usize, ActionScores)>,
}

impl AutoMl {
    /// Build a selector with the priority function named by `cfg.priority_type`.
    ///
    /// # Errors
    ///
    /// [`AutoMlError::Configuration`] if `cfg` does not validate.
    pub fn new(cfg: AutoMlConfig) -> Result<Self, AutoMlError> {
        let f = cfg.priority_type.priority_fn();
        Self::with_priority_fn(cfg, f)
    }

    /// Like [`new`](Self::new), but first reject incompatible host options.
    pub fn with_host_options<'a>(
        cfg: AutoMlConfig,
        enabled_host_options: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, AutoMlError> {
        cfg.fail_if_enabled(enabled_host_options)?;
        Self::new(cfg)
    }

    /// Build a selector with a caller-supplied priority function.
    pub fn with_priority_fn(cfg: AutoMlConfig, calc_priority: PriorityFn) -> Result<Self, AutoMlError> {
        cfg.validate()?;
        let cm = ConfigManager::new(&cfg, calc_priority, RandState::new(cfg.random_seed))?;
        log::info!(
            "automl: {} live slots, oracle={}, interactions={}, horizon={}",
            cfg.max_live_configs,
            cfg.oracle_type,
            cfg.interaction_type,
            cfg.eval_horizon
        );
        Ok(Self {
            cfg,
            state: AutoMlState::Collecting,
            cm,
            examples_since_new_ns: 0,
            buffer: Vec::with_capacity(MAX_CONFIGS),
        })
    }

    pub fn state(&self) -> AutoMlState {
        self.state
    }

    pub fn config(&self) -> &AutoMlConfig {
        &self.cfg
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.cm
    }

    /// Direct manager access for tooling and tests.
    pub fn manager_mut(&mut self) -> &mut ConfigManager {
        &mut self.cm
    }

    pub fn champion_interactions(&self) -> &[Interaction] {
        self.cm.champion_interactions()
    }

    pub fn metrics(&self) -> AutoMlMetrics {
        AutoMlMetrics {
            state: self.state,
            total_learn_count: self.cm.total_learn_count(),
            total_champ_switches: self.cm.total_champ_switches(),
            champion: self.cm.current_champ(),
            champion_interactions: crate::interactions_to_string(self.cm.champion_interactions()),
            config_count: self.cm.configs().len(),
            queue_len: self.cm.index_queue().len(),
            namespace_count: self.cm.ns_counter().len(),
            slots: self.cm.slot_metrics(),
        }
    }

    /// Process one example end to end.
    ///
    /// Every live slot learns on the example projected onto its own
    /// interactions; estimators are updated from the logged feedback; then,
    /// when experimenting and on an update boundary, the manager schedules
    /// and tests challengers.
    ///
    /// Returns the champion's action scores.
    pub fn one_step<L: BaseLearner + ?Sized>(
        &mut self,
        base: &mut L,
        example: &mut CbExample,
        logged: &LoggedFeedback,
        logged_action: usize,
    ) -> Result<ActionScores, AutoMlError> {
        let new_ns = self.cm.pre_process(example);
        self.track_stability(new_ns);

        let scores = self.offset_learn(base, example, logged, logged_action)?;

        if self.state == AutoMlState::Experimenting
            && self.cm.total_learn_count() % self.cfg.update_interval == 0
        {
            self.cm.schedule()?;
            self.cm.update_champ()?;
        }

        #[cfg(debug_assertions)]
        self.cm.check_invariants()?;

        Ok(scores)
    }

    fn track_stability(&mut self, new_ns: bool) {
        if new_ns {
            self.examples_since_new_ns = 0;
            return;
        }
        self.examples_since_new_ns = self.examples_since_new_ns.saturating_add(1);
        if self.state == AutoMlState::Collecting
            && self.examples_since_new_ns >= self.cfg.collect_stable_examples
        {
            self.state = AutoMlState::Experimenting;
            log::info!(
                "automl: {} -> {} after {} examples ({} namespaces)",
                AutoMlState::Collecting,
                self.state,
                self.cm.total_learn_count(),
                self.cm.ns_counter().len()
            );
        }
    }

    /// Learn every live slot, then feed the logged reward to every estimator.
    ///
    /// Returns the champion's scores.
    pub fn offset_learn<L: BaseLearner + ?Sized>(
        &mut self,
        base: &mut L,
        example: &mut CbExample,
        logged: &LoggedFeedback,
        logged_action: usize,
    ) -> Result<ActionScores, AutoMlError> {
        let mut slots = self.cm.live_slots();
        if slots.len() > MAX_CONFIGS {
            return Err(AutoMlError::invariant(format!(
                "{} live slots above MAX_CONFIGS",
                slots.len()
            )));
        }
        if self.cfg.debug_reverse_learning_order {
            slots.reverse();
        }

        self.buffer.clear();
        for slot in slots {
            let scores = self.cm.learn_slot(slot, &mut *base, &mut *example, logged, logged_action)?;
            self.buffer.push((slot, scores));
        }

        let greedy: Vec<(usize, usize)> = self
            .buffer
            .iter()
            .filter_map(|(slot, s)| s.first().map(|a| (*slot, a.action)))
            .collect();
        let reward = reward_from_cost(logged.cost, self.cfg.cost_range);
        self.cm
            .record_feedback(&greedy, reward, logged_action, logged.probability);

        let champ_at = self.buffer.iter().position(|(slot, _)| *slot == 0);
        Ok(champ_at
            .map(|i| self.buffer.swap_remove(i).1)
            .unwrap_or_default())
    }

    // ========================================================================
    // Checkpointing
    // ========================================================================

    /// Append this selector's checkpoint fields to `buf`.
    pub fn write_checkpoint<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        write_u8(buf, self.state.to_u8())
            + self
                .cm
                .write_to(buf, self.cfg.should_save_predict_only_model)
            + write_u64(buf, self.examples_since_new_ns)
    }

    /// Restore a selector saved by [`write_checkpoint`](Self::write_checkpoint).
    ///
    /// `cfg` must describe the same pool geometry as the saved run.
    pub fn read_checkpoint<B: ModelBuffer + ?Sized>(
        buf: &mut B,
        cfg: AutoMlConfig,
    ) -> Result<Self, AutoMlError> {
        let f = cfg.priority_type.priority_fn();
        Self::read_checkpoint_with_priority(buf, cfg, f)
    }

    pub fn read_checkpoint_with_priority<B: ModelBuffer + ?Sized>(
        buf: &mut B,
        cfg: AutoMlConfig,
        calc_priority: PriorityFn,
    ) -> Result<Self, AutoMlError> {
        cfg.validate()?;
        let state = AutoMlState::from_u8(read_u8(buf, "automl.state")?)?;
        let cm = ConfigManager::read_from(buf, &cfg, calc_priority)?;
        let examples_since_new_ns = read_u64(buf, "automl.examples_since_new_ns")?;
        log::debug!(
            "restored automl in {state} with {} configs, champion {}",
            cm.configs().len(),
            cm.current_champ()
        );
        Ok(Self {
            cfg,
            state,
            cm,
            examples_since_new_ns,
            buffer: Vec::with_capacity(MAX_CONFIGS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeatureGroups, IoBuf, Namespace, SgdCbLearner};

    fn example(tags: &str) -> CbExample {
        let mut shared = FeatureGroups::new();
        for t in tags.bytes() {
            shared.push(Namespace(t), 1, 1.0);
        }
        let actions = vec![
            FeatureGroups::new().with(Namespace(b'x'), 1, 1.0),
            FeatureGroups::new().with(Namespace(b'x'), 2, 1.0),
        ];
        CbExample::new(shared, actions)
    }

    fn small() -> AutoMlConfig {
        AutoMlConfig::default()
            .with_max_live_configs(3)
            .with_weight_bits(8)
            .with_collect_stable_examples(2)
            .with_eval_horizon(20)
    }

    #[test]
    fn state_names() {
        assert_eq!(AutoMlState::Collecting.to_string(), "Collecting");
        assert_eq!(AutoMlState::Experimenting.as_str(), "Experimenting");
        assert!(AutoMlState::from_u8(7).is_err());
    }

    #[test]
    fn moves_to_experimenting_once_namespaces_stabilize() {
        let mut aml = AutoMl::new(small()).unwrap();
        let mut base = SgdCbLearner::default();
        let logged = LoggedFeedback { cost: 0.0, probability: 0.5 };
        let mut ex = example("ab");
        aml.one_step(&mut base, &mut ex, &logged, 0).unwrap();
        assert_eq!(aml.state(), AutoMlState::Collecting);
        aml.one_step(&mut base, &mut ex, &logged, 0).unwrap();
        assert_eq!(aml.state(), AutoMlState::Collecting);
        aml.one_step(&mut base, &mut ex, &logged, 0).unwrap();
        assert_eq!(aml.state(), AutoMlState::Experimenting);
        assert_eq!(aml.manager().live_slots(), vec![0, 1, 2]);
    }

    #[test]
    fn incompatible_host_option_fails_construction() {
        let err = AutoMl::with_host_options(small(), ["slates"]).unwrap_err();
        assert!(matches!(err, AutoMlError::Configuration(_)));
    }

    #[test]
    fn reverse_order_gives_identical_results() {
        let run = |reverse: bool| {
            let mut aml = AutoMl::new(small().with_reverse_learning_order(reverse)).unwrap();
            let mut base = SgdCbLearner::default();
            let mut out = Vec::new();
            for i in 0..30 {
                let mut ex = example("abc");
                let logged = LoggedFeedback {
                    cost: (i % 3) as f32 / 2.0,
                    probability: 0.5,
                };
                out.push(aml.one_step(&mut base, &mut ex, &logged, i % 2).unwrap());
            }
            (out, aml.metrics())
        };
        assert_eq!(run(false), run(true));
    }

    #[test]
    fn checkpoint_restores_state_and_counters() {
        let mut aml = AutoMl::new(small()).unwrap();
        let mut base = SgdCbLearner::default();
        for i in 0..5 {
            let mut ex = example("ab");
            let logged = LoggedFeedback { cost: 1.0, probability: 0.5 };
            aml.one_step(&mut base, &mut ex, &logged, i % 2).unwrap();
        }
        let mut buf = IoBuf::new();
        aml.write_checkpoint(&mut buf);
        let mut r = IoBuf::from_bytes(buf.into_bytes());
        let back = AutoMl::read_checkpoint(&mut r, small()).unwrap();
        assert_eq!(back.state(), aml.state());
        assert_eq!(back.metrics(), aml.metrics());
        assert_eq!(r.remaining(), 0);
    }
}
