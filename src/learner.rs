//! Base-learner seam and a small reference implementation.
//!
//! The selection core never updates weights itself. It hands each live slot's
//! [`SlotWeights`] view, the slot's [`SlotAux`] totals and the projected
//! example to a [`BaseLearner`], and consumes the returned [`ActionScores`].

use crate::stable_hash::{feature_hash, interaction_hash};
use crate::{
    ActionScore, ActionScores, CbExample, LoggedFeedback, SlotAux, SlotWeights, CONSTANT_NAMESPACE,
};

/// A per-slot cost regressor over multi-action examples.
///
/// Implementations must only touch weights through the provided view, and
/// must honor the example's *current* interaction list (which the caller has
/// already projected onto the slot's configuration).
pub trait BaseLearner {
    /// Score every action, then learn from the logged feedback.
    ///
    /// Returns the scores computed before the update, lowest cost first.
    fn learn(
        &mut self,
        weights: &mut SlotWeights<'_>,
        aux: &mut SlotAux,
        example: &CbExample,
        logged: &LoggedFeedback,
        logged_action: usize,
    ) -> ActionScores;

    /// Score every action without learning.
    fn predict(&self, weights: &SlotWeights<'_>, example: &CbExample) -> ActionScores;
}

/// Linear per-action cost regression with importance-weighted squared loss.
///
/// With `stride >= 2` each block stores `[weight, sum of squared gradients]`
/// and updates are AdaGrad-scaled; with `stride == 1` the learning rate decays
/// as `lr / (1 + t)^power_t` using the slot's event count.
#[derive(Debug, Clone, PartialEq)]
pub struct SgdCbLearner {
    pub learning_rate: f32,
    pub power_t: f32,
    /// Importance weights are capped here to keep single updates bounded.
    pub max_importance: f32,
}

impl Default for SgdCbLearner {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            power_t: 0.5,
            max_importance: 100.0,
        }
    }
}

impl SgdCbLearner {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }

    /// Hashed features for `action`: bias, every visible namespace, then the
    /// example's interaction terms.
    fn features(example: &CbExample, action: usize) -> Vec<(u64, f32)> {
        let mut out = vec![(feature_hash(CONSTANT_NAMESPACE, 0), 1.0)];
        for ns in example.action_namespaces(action) {
            for f in example.features(action, ns) {
                out.push((feature_hash(ns, f.index), f.value));
            }
        }
        for inter in example.interactions() {
            let mut terms: Vec<(u64, f32)> = Vec::new();
            for (pos, &ns) in inter.namespaces().iter().enumerate() {
                let fs: Vec<(u64, f32)> = example
                    .features(action, ns)
                    .map(|f| (feature_hash(ns, f.index), f.value))
                    .collect();
                terms = if pos == 0 {
                    fs
                } else {
                    terms
                        .iter()
                        .flat_map(|&(h, v)| fs.iter().map(move |&(h2, v2)| (interaction_hash(h, h2), v * v2)))
                        .collect()
                };
                if terms.is_empty() {
                    break;
                }
            }
            out.extend(terms);
        }
        out
    }

    fn score(weights: &SlotWeights<'_>, feats: &[(u64, f32)]) -> f32 {
        feats.iter().map(|&(h, x)| weights.read_block(h)[0] * x).sum()
    }

    fn rank(mut scores: ActionScores) -> ActionScores {
        scores.sort_by(|a, b| a.score.total_cmp(&b.score));
        scores
    }
}

impl BaseLearner for SgdCbLearner {
    fn learn(
        &mut self,
        weights: &mut SlotWeights<'_>,
        aux: &mut SlotAux,
        example: &CbExample,
        logged: &LoggedFeedback,
        logged_action: usize,
    ) -> ActionScores {
        let scores = self.predict(weights, example);
        if logged_action >= example.action_count() || logged.probability <= 0.0 {
            return scores;
        }

        let feats = Self::features(example, logged_action);
        let pred = Self::score(weights, &feats);
        let importance = (1.0 / logged.probability).min(self.max_importance);
        let grad = (pred - logged.cost) * importance;

        if weights.stride() >= 2 {
            for &(h, x) in &feats {
                let b = weights.block(h);
                let g = grad * x;
                b[1] += g * g;
                if b[1] > 0.0 {
                    b[0] -= self.learning_rate * g / b[1].sqrt();
                }
            }
        } else {
            let t = aux.event_sum as f32;
            let lr = self.learning_rate / (1.0 + t).powf(self.power_t);
            for &(h, x) in &feats {
                weights.block(h)[0] -= lr * grad * x;
            }
        }

        aux.total_weight += importance as f64;
        aux.event_sum = aux.event_sum.saturating_add(1);
        aux.action_sum = aux.action_sum.saturating_add(example.action_count() as u64);
        log::trace!(
            "slot {} learned action {logged_action}: pred={pred:.4} cost={:.4}",
            weights.slot(),
            logged.cost
        );
        scores
    }

    fn predict(&self, weights: &SlotWeights<'_>, example: &CbExample) -> ActionScores {
        let scores = (0..example.action_count())
            .map(|a| ActionScore {
                action: a,
                score: Self::score(weights, &Self::features(example, a)),
            })
            .collect();
        Self::rank(scores)
    }
}
