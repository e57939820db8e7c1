//! Sequential performance estimates for live slots.
//!
//! Each live slot carries an [`EstimatorPair`]:
//!
//! - `challenger`: the slot's own importance-weighted reward estimate.
//! - `champion_horizon`: the champion's reward, measured over exactly the same
//!   examples the challenger has seen.
//!
//! Comparing a challenger against its own horizon (rather than against the
//! champion's lifetime estimate) keeps both sides of the test on the same
//! sample, which is what makes the comparison sound when challengers enter
//! and leave the pool at different times.
//!
//! The interval itself is an empirical-Bernstein bound with exponential
//! forgetting. The core only ever consumes it through [`better`] and
//! [`worse`].

use crate::persist::{
    read_bool, read_f64, read_interactions, read_u64, write_bool, write_f64, write_interactions,
    write_u64,
};
use crate::{AutoMlError, Interaction, ModelBuffer, Persist};

// ============================================================================
// Confidence sequence
// ============================================================================

/// Decayed empirical-Bernstein interval over importance-weighted rewards in `[0, 1]`.
///
/// Parameters:
/// - `alpha`: significance level (two-sided miss probability of the interval).
/// - `tau`: per-observation decay of the sufficient statistics; `1.0` keeps
///   everything, smaller values forget old observations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfidenceSequence {
    alpha: f64,
    tau: f64,
    /// Decayed effective sample size.
    n: f64,
    /// Raw number of updates (not decayed).
    update_count: u64,
    sum_wr: f64,
    sum_wr_sq: f64,
    max_wr: f64,
}

impl ConfidenceSequence {
    pub fn new(alpha: f64, tau: f64) -> Self {
        Self {
            alpha,
            tau,
            n: 0.0,
            update_count: 0,
            sum_wr: 0.0,
            sum_wr_sq: 0.0,
            max_wr: 0.0,
        }
    }

    /// Forget all observations; parameters are kept.
    pub fn reset_stats(&mut self) {
        *self = Self::new(self.alpha, self.tau);
    }

    /// Record reward `r` with importance weight `w`.
    pub fn update(&mut self, w: f64, r: f64) {
        let wr = w * r;
        self.n = self.tau * self.n + 1.0;
        self.sum_wr = self.tau * self.sum_wr + wr;
        self.sum_wr_sq = self.tau * self.sum_wr_sq + wr * wr;
        self.max_wr = self.max_wr.max(wr);
        self.update_count = self.update_count.saturating_add(1);
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Importance-weighted mean reward (0 before any update).
    pub fn current_ips(&self) -> f64 {
        if self.n <= 0.0 {
            0.0
        } else {
            self.sum_wr / self.n
        }
    }

    fn radius(&self) -> f64 {
        let l = (3.0 / self.alpha).ln();
        let mean = self.current_ips();
        let var = (self.sum_wr_sq / self.n - mean * mean).max(0.0);
        (2.0 * var * l / self.n).sqrt() + 3.0 * self.max_wr.max(1.0) * l / self.n
    }

    pub fn lower_bound(&self) -> f64 {
        if self.n <= 0.0 {
            return 0.0;
        }
        (self.current_ips() - self.radius()).clamp(0.0, 1.0)
    }

    pub fn upper_bound(&self) -> f64 {
        if self.n <= 0.0 {
            return 1.0;
        }
        (self.current_ips() + self.radius()).clamp(0.0, 1.0)
    }
}

impl Persist for ConfidenceSequence {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        write_f64(buf, self.alpha)
            + write_f64(buf, self.tau)
            + write_f64(buf, self.n)
            + write_u64(buf, self.update_count)
            + write_f64(buf, self.sum_wr)
            + write_f64(buf, self.sum_wr_sq)
            + write_f64(buf, self.max_wr)
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        let alpha = read_f64(buf, "estimator.alpha")?;
        let tau = read_f64(buf, "estimator.tau")?;
        if !(alpha > 0.0 && alpha < 1.0) || !(tau > 0.0 && tau <= 1.0) {
            return Err(AutoMlError::decode(format!(
                "estimator parameters out of range: alpha={alpha} tau={tau}"
            )));
        }
        Ok(Self {
            alpha,
            tau,
            n: read_f64(buf, "estimator.n")?,
            update_count: read_u64(buf, "estimator.update_count")?,
            sum_wr: read_f64(buf, "estimator.sum_wr")?,
            sum_wr_sq: read_f64(buf, "estimator.sum_wr_sq")?,
            max_wr: read_f64(buf, "estimator.max_wr")?,
        })
    }
}

// ============================================================================
// Per-slot estimator
// ============================================================================

/// A live slot's own estimate plus the bookkeeping the manager needs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerformanceEstimator {
    pub stats: ConfidenceSequence,
    /// Handle of the config occupying the slot.
    pub config_index: u64,
    /// Enough evidence has accumulated to promote or evict this slot.
    pub eligible_to_inactivate: bool,
    /// Materialized interactions the slot currently trains with.
    pub live_interactions: Vec<Interaction>,
}

/// Challenger estimate and the champion's reward over the same examples.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EstimatorPair {
    pub challenger: PerformanceEstimator,
    pub champion_horizon: ConfidenceSequence,
}

impl EstimatorPair {
    pub fn new(alpha: f64, tau: f64, config_index: u64, live_interactions: Vec<Interaction>) -> Self {
        Self {
            challenger: PerformanceEstimator {
                stats: ConfidenceSequence::new(alpha, tau),
                config_index,
                eligible_to_inactivate: false,
                live_interactions,
            },
            champion_horizon: ConfidenceSequence::new(alpha, tau),
        }
    }

    pub fn config_index(&self) -> u64 {
        self.challenger.config_index
    }

    /// Record this slot's own importance-weighted reward.
    pub fn observe(&mut self, w: f64, r: f64) {
        self.challenger.stats.update(w, r);
    }

    /// Record the champion's reward on the same example.
    ///
    /// Under `lb_trick` the horizon tracks `1 - r`, so its lower bound is a
    /// one-sided bound on the champion's upper tail.
    pub fn observe_champion(&mut self, lb_trick: bool, w: f64, r: f64) {
        let r = if lb_trick { 1.0 - r } else { r };
        self.champion_horizon.update(w, r);
    }

    /// Drop accumulated evidence on both sides; the eligibility flag goes with it.
    pub fn reset_stats(&mut self) {
        self.challenger.stats.reset_stats();
        self.challenger.eligible_to_inactivate = false;
        self.champion_horizon.reset_stats();
    }

    /// Samples counted toward eligibility.
    pub fn evidence_count(&self, lb_trick: bool) -> u64 {
        let own = self.challenger.stats.update_count();
        if lb_trick {
            own.min(self.champion_horizon.update_count())
        } else {
            own
        }
    }
}

impl Persist for EstimatorPair {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        self.challenger.stats.write_to(buf)
            + self.champion_horizon.write_to(buf)
            + write_u64(buf, self.challenger.config_index)
            + write_bool(buf, self.challenger.eligible_to_inactivate)
            + write_interactions(buf, self.challenger.live_interactions.iter())
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        let stats = ConfidenceSequence::read_from(buf)?;
        let champion_horizon = ConfidenceSequence::read_from(buf)?;
        let config_index = read_u64(buf, "estimator.config_index")?;
        let eligible_to_inactivate = read_bool(buf, "estimator.eligible")?;
        let live_interactions = read_interactions(buf, "estimator.live_interactions")?;
        Ok(Self {
            challenger: PerformanceEstimator {
                stats,
                config_index,
                eligible_to_inactivate,
                live_interactions,
            },
            champion_horizon,
        })
    }
}

// ============================================================================
// Comparisons
// ============================================================================

/// Challenger's reward is significantly above the champion's over the same horizon.
#[must_use]
pub fn better(lb_trick: bool, challenger: &ConfidenceSequence, horizon: &ConfidenceSequence) -> bool {
    if lb_trick {
        challenger.lower_bound() > 1.0 - horizon.lower_bound()
    } else {
        challenger.lower_bound() > horizon.upper_bound()
    }
}

/// Challenger's reward is significantly below the champion's over the same horizon.
///
/// Not the negation of [`better`]: overlapping intervals are neither.
#[must_use]
pub fn worse(lb_trick: bool, challenger: &ConfidenceSequence, horizon: &ConfidenceSequence) -> bool {
    if lb_trick {
        challenger.upper_bound() < 1.0 - horizon.upper_bound()
    } else {
        challenger.upper_bound() < horizon.lower_bound()
    }
}

// ============================================================================
// Feedback conversion
// ============================================================================

/// Map a cost in `cost_range` to a reward in `[0, 1]` (low cost, high reward).
#[must_use]
pub fn reward_from_cost(cost: f32, cost_range: (f32, f32)) -> f64 {
    let (lo, hi) = cost_range;
    let span = (hi - lo) as f64;
    if span <= 0.0 {
        return 0.0;
    }
    (1.0 - (cost as f64 - lo as f64) / span).clamp(0.0, 1.0)
}

/// Inverse-propensity weight for a slot whose greedy action is `predicted`.
#[must_use]
pub fn importance_weight(predicted: usize, logged_action: usize, probability: f32) -> f64 {
    if predicted == logged_action && probability > 0.0 {
        1.0 / probability as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoBuf;

    fn fed(alpha: f64, rewards: impl IntoIterator<Item = f64>) -> ConfidenceSequence {
        let mut cs = ConfidenceSequence::new(alpha, 1.0);
        for r in rewards {
            cs.update(1.0, r);
        }
        cs
    }

    #[test]
    fn empty_interval_is_vacuous() {
        let cs = ConfidenceSequence::new(0.05, 1.0);
        assert_eq!(cs.lower_bound(), 0.0);
        assert_eq!(cs.upper_bound(), 1.0);
        assert_eq!(cs.current_ips(), 0.0);
    }

    #[test]
    fn interval_tightens_with_evidence() {
        let few = fed(0.05, std::iter::repeat(0.5).take(10));
        let many = fed(0.05, std::iter::repeat(0.5).take(10_000));
        let w_few = few.upper_bound() - few.lower_bound();
        let w_many = many.upper_bound() - many.lower_bound();
        assert!(w_many < w_few);
        assert!(many.lower_bound() < 0.5 && 0.5 < many.upper_bound());
        assert!((many.current_ips() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn decay_shrinks_effective_sample() {
        let mut cs = ConfidenceSequence::new(0.05, 0.5);
        for _ in 0..100 {
            cs.update(1.0, 1.0);
        }
        // Effective n converges to 1 / (1 - tau) = 2.
        assert!((cs.n - 2.0).abs() < 1e-9);
        assert_eq!(cs.update_count(), 100);
    }

    #[test]
    fn reset_keeps_parameters() {
        let mut cs = fed(0.1, [1.0, 0.0]);
        cs.reset_stats();
        assert_eq!(cs, ConfidenceSequence::new(0.1, 1.0));
    }

    #[test]
    fn better_and_worse_are_not_complements() {
        let hi = fed(0.05, std::iter::repeat(0.9).take(5000));
        let lo = fed(0.05, std::iter::repeat(0.1).take(5000));
        let tiny = fed(0.05, [0.5]);

        assert!(better(false, &hi, &lo));
        assert!(worse(false, &lo, &hi));
        assert!(!better(false, &lo, &hi));
        // Overlapping intervals: neither better nor worse.
        assert!(!better(false, &tiny, &lo));
        assert!(!worse(false, &tiny, &lo));
    }

    #[test]
    fn lb_trick_compares_against_mirrored_horizon() {
        let mut pair = EstimatorPair::new(0.05, 1.0, 1, Vec::new());
        for _ in 0..5000 {
            pair.observe(1.0, 0.9);
            pair.observe_champion(true, 1.0, 0.1);
        }
        assert!(pair.champion_horizon.current_ips() > 0.89);
        assert!(better(true, &pair.challenger.stats, &pair.champion_horizon));
        assert!(!worse(true, &pair.challenger.stats, &pair.champion_horizon));
    }

    #[test]
    fn evidence_count_uses_smaller_side_under_lb_trick() {
        let mut pair = EstimatorPair::new(0.05, 1.0, 3, Vec::new());
        pair.observe(1.0, 1.0);
        pair.observe(1.0, 1.0);
        pair.observe_champion(true, 1.0, 1.0);
        assert_eq!(pair.evidence_count(false), 2);
        assert_eq!(pair.evidence_count(true), 1);
    }

    #[test]
    fn reward_and_weight_conversion() {
        assert_eq!(reward_from_cost(0.0, (0.0, 1.0)), 1.0);
        assert_eq!(reward_from_cost(1.0, (0.0, 1.0)), 0.0);
        assert_eq!(reward_from_cost(-3.0, (-1.0, 0.0)), 1.0);
        assert_eq!(reward_from_cost(0.5, (1.0, 1.0)), 0.0);
        assert_eq!(importance_weight(2, 2, 0.25), 4.0);
        assert_eq!(importance_weight(1, 2, 0.25), 0.0);
        assert_eq!(importance_weight(2, 2, 0.0), 0.0);
    }

    #[test]
    fn pair_survives_checkpoint() {
        let mut pair = EstimatorPair::new(0.05, 0.999, 4, vec![Interaction::from("ab")]);
        pair.observe(2.0, 0.5);
        pair.observe_champion(false, 0.0, 0.5);
        pair.challenger.eligible_to_inactivate = true;

        let mut b = IoBuf::new();
        let n = pair.write_to(&mut b);
        assert_eq!(n, b.len());
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert_eq!(EstimatorPair::read_from(&mut r).unwrap(), pair);
    }

    #[test]
    fn corrupt_parameters_are_rejected() {
        let mut b = IoBuf::new();
        ConfidenceSequence::new(1.5, 1.0).write_to(&mut b);
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert!(ConfidenceSequence::read_from(&mut r).is_err());
    }
}
