//! Selector configuration.

use crate::{
    AutoMlError, InteractionType, OracleType, PriorityType, WeightArena, MAX_CONFIGS, MAX_RECORD_BYTES,
    MAX_STRIDE, MAX_WEIGHT_BITS,
};

/// Full configuration for an [`AutoMl`](crate::AutoMl) instance.
///
/// Start with [`AutoMlConfig::default()`] and adjust via the builder methods
/// or by setting fields directly, then call [`validate`](Self::validate)
/// (construction does this for you).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoMlConfig {
    // --- Pool ---
    /// Simultaneously live configs, champion included (`1..=MAX_CONFIGS`).
    pub max_live_configs: usize,
    /// Evictions a candidate survives before it is retired.
    pub global_lease: u64,
    /// Samples a challenger needs before it can be promoted or evicted.
    pub eval_horizon: u64,
    /// Challenger slots `1..=n` take the highest-priority pending candidate;
    /// the remaining slots take the longest-waiting one. `None` means half
    /// of the challenger slots, rounded down.
    pub priority_challengers: Option<usize>,

    // --- Statistics ---
    /// Significance level of every confidence interval.
    pub significance_level: f64,
    /// Per-observation decay of estimator statistics (`1.0` = no forgetting).
    pub estimator_decay: f64,
    /// One-sided champion comparison.
    pub lb_trick: bool,

    // --- Search space ---
    pub interaction_type: InteractionType,
    pub oracle_type: OracleType,
    pub priority_type: PriorityType,
    /// Append the slot-id namespace to every interaction (conditional
    /// contextual bandits).
    pub ccb_on: bool,

    // --- Driver ---
    /// Consecutive examples without a new namespace before experimenting starts.
    pub collect_stable_examples: u64,
    /// Run scheduling and promotion every this many examples.
    pub update_interval: u64,
    /// Learn live slots in descending order (debugging aid).
    pub debug_reverse_learning_order: bool,
    /// Costs outside this range are clamped when converted to rewards.
    pub cost_range: (f32, f32),

    // --- Weights ---
    pub weight_bits: u32,
    /// Cells per feature block (2 enables per-feature adaptive rates).
    pub stride: usize,

    pub random_seed: u64,
    /// Checkpoint only the champion.
    pub should_save_predict_only_model: bool,
}

impl Default for AutoMlConfig {
    fn default() -> Self {
        Self {
            max_live_configs: 4,
            global_lease: crate::DEFAULT_LEASE,
            eval_horizon: 1000,
            priority_challengers: None,
            significance_level: 0.05,
            estimator_decay: 1.0,
            lb_trick: false,
            interaction_type: InteractionType::Quadratic,
            oracle_type: OracleType::OneDiff,
            priority_type: PriorityType::None,
            ccb_on: false,
            collect_stable_examples: 10,
            update_interval: 1,
            debug_reverse_learning_order: false,
            cost_range: (0.0, 1.0),
            weight_bits: 18,
            stride: 2,
            random_seed: 0,
            should_save_predict_only_model: false,
        }
    }
}

/// Host features that cannot run underneath the selector.
const INCOMPATIBLE_OPTIONS: &[&str] = &["slates", "baseline_challenger_cb"];

impl AutoMlConfig {
    pub fn with_max_live_configs(mut self, n: usize) -> Self {
        self.max_live_configs = n;
        self
    }

    pub fn with_global_lease(mut self, lease: u64) -> Self {
        self.global_lease = lease;
        self
    }

    pub fn with_eval_horizon(mut self, n: u64) -> Self {
        self.eval_horizon = n;
        self
    }

    pub fn with_priority_challengers(mut self, n: usize) -> Self {
        self.priority_challengers = Some(n);
        self
    }

    /// Number of challenger slots filled by priority.
    pub fn priority_challenger_slots(&self) -> usize {
        let challengers = self.max_live_configs.saturating_sub(1);
        self.priority_challengers.unwrap_or(challengers / 2)
    }

    /// Set significance level and decay together.
    pub fn with_estimator(mut self, significance_level: f64, decay: f64) -> Self {
        self.significance_level = significance_level;
        self.estimator_decay = decay;
        self
    }

    pub fn with_lb_trick(mut self, on: bool) -> Self {
        self.lb_trick = on;
        self
    }

    pub fn with_interaction_type(mut self, t: InteractionType) -> Self {
        self.interaction_type = t;
        self
    }

    pub fn with_oracle(mut self, t: OracleType) -> Self {
        self.oracle_type = t;
        self
    }

    pub fn with_priority(mut self, t: PriorityType) -> Self {
        self.priority_type = t;
        self
    }

    pub fn with_ccb(mut self, on: bool) -> Self {
        self.ccb_on = on;
        self
    }

    pub fn with_collect_stable_examples(mut self, n: u64) -> Self {
        self.collect_stable_examples = n;
        self
    }

    pub fn with_update_interval(mut self, n: u64) -> Self {
        self.update_interval = n;
        self
    }

    pub fn with_reverse_learning_order(mut self, on: bool) -> Self {
        self.debug_reverse_learning_order = on;
        self
    }

    pub fn with_cost_range(mut self, lo: f32, hi: f32) -> Self {
        self.cost_range = (lo, hi);
        self
    }

    pub fn with_weight_bits(mut self, bits: u32) -> Self {
        self.weight_bits = bits;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_predict_only_save(mut self, on: bool) -> Self {
        self.should_save_predict_only_model = on;
        self
    }

    /// Reject values the selector cannot run with.
    pub fn validate(&self) -> Result<(), AutoMlError> {
        if self.max_live_configs == 0 || self.max_live_configs > MAX_CONFIGS {
            return Err(AutoMlError::config(format!(
                "max_live_configs must be in 1..={MAX_CONFIGS}, got {}",
                self.max_live_configs
            )));
        }
        if let Some(n) = self.priority_challengers {
            if n >= self.max_live_configs {
                return Err(AutoMlError::config(format!(
                    "priority_challengers must be below max_live_configs ({}), got {n}",
                    self.max_live_configs
                )));
            }
        }
        if self.global_lease == 0 {
            return Err(AutoMlError::config("global_lease must be positive"));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(AutoMlError::config(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            )));
        }
        if !(self.estimator_decay > 0.0 && self.estimator_decay <= 1.0) {
            return Err(AutoMlError::config(format!(
                "estimator_decay must be in (0, 1], got {}",
                self.estimator_decay
            )));
        }
        if self.update_interval == 0 {
            return Err(AutoMlError::config("update_interval must be positive"));
        }
        let (lo, hi) = self.cost_range;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(AutoMlError::config(format!(
                "cost_range must be finite with lo < hi, got ({lo}, {hi})"
            )));
        }
        if self.weight_bits == 0 || self.weight_bits > MAX_WEIGHT_BITS {
            return Err(AutoMlError::config(format!(
                "weight_bits must be in 1..={MAX_WEIGHT_BITS}, got {}",
                self.weight_bits
            )));
        }
        if self.stride == 0 || self.stride > MAX_STRIDE {
            return Err(AutoMlError::config(format!(
                "stride must be in 1..={MAX_STRIDE}, got {}",
                self.stride
            )));
        }
        if WeightArena::cell_count(self.weight_bits, self.max_live_configs, self.stride).is_none() {
            return Err(AutoMlError::config(format!(
                "weight arena for {} slots at {} bits and stride {} exceeds {MAX_RECORD_BYTES} bytes",
                self.max_live_configs, self.weight_bits, self.stride
            )));
        }
        Ok(())
    }

    /// Fail if any host option that cannot coexist with the selector is enabled.
    ///
    /// `ccb_explore_adf` is only accepted when `ccb_on` is set.
    pub fn fail_if_enabled<'a>(
        &self,
        enabled_host_options: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), AutoMlError> {
        for opt in enabled_host_options {
            if INCOMPATIBLE_OPTIONS.contains(&opt) || (opt == "ccb_explore_adf" && !self.ccb_on) {
                log::warn!("rejecting host option '{opt}'");
                return Err(AutoMlError::config(format!(
                    "automl is not compatible with '{opt}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AutoMlConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_sets_fields() {
        let c = AutoMlConfig::default()
            .with_max_live_configs(7)
            .with_estimator(0.1, 0.99)
            .with_oracle(OracleType::Rand)
            .with_cost_range(-1.0, 0.0);
        assert_eq!(c.max_live_configs, 7);
        assert_eq!(c.significance_level, 0.1);
        assert_eq!(c.estimator_decay, 0.99);
        assert_eq!(c.oracle_type, OracleType::Rand);
        c.validate().unwrap();
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let bad = [
            AutoMlConfig::default().with_max_live_configs(0),
            AutoMlConfig::default().with_max_live_configs(11),
            AutoMlConfig::default().with_estimator(0.0, 1.0),
            AutoMlConfig::default().with_estimator(0.05, 1.5),
            AutoMlConfig::default().with_update_interval(0),
            AutoMlConfig::default().with_cost_range(1.0, 1.0),
            AutoMlConfig::default().with_weight_bits(40),
            AutoMlConfig::default().with_global_lease(0),
            AutoMlConfig::default().with_stride(MAX_STRIDE + 1),
            AutoMlConfig::default().with_max_live_configs(10).with_weight_bits(24).with_stride(8),
            AutoMlConfig::default().with_priority_challengers(4),
        ];
        for c in bad {
            assert!(matches!(c.validate(), Err(AutoMlError::Configuration(_))), "{c:?}");
        }
    }

    #[test]
    fn priority_challengers_default_to_half_the_challenger_slots() {
        assert_eq!(AutoMlConfig::default().priority_challenger_slots(), 1);
        let c = AutoMlConfig::default().with_max_live_configs(9);
        assert_eq!(c.priority_challenger_slots(), 4);
        assert_eq!(c.with_priority_challengers(8).priority_challenger_slots(), 8);
        assert_eq!(AutoMlConfig::default().with_max_live_configs(1).priority_challenger_slots(), 0);
    }

    #[test]
    fn incompatible_host_options() {
        let c = AutoMlConfig::default();
        assert!(c.fail_if_enabled(["cb_explore_adf"]).is_ok());
        assert!(c.fail_if_enabled(["slates"]).is_err());
        assert!(c.fail_if_enabled(["ccb_explore_adf"]).is_err());
        assert!(c.clone().with_ccb(true).fail_if_enabled(["ccb_explore_adf"]).is_ok());
    }
}
