//! Contextual-bandit examples and the scoped interaction projection applied
//! per live slot.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;

use crate::{Interaction, Namespace};

/// One hashed feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub index: u64,
    pub value: f32,
}

/// Features grouped by namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureGroups {
    groups: BTreeMap<Namespace, Vec<Feature>>,
}

impl FeatureGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, ns: Namespace, index: u64, value: f32) -> Self {
        self.push(ns, index, value);
        self
    }

    pub fn push(&mut self, ns: Namespace, index: u64, value: f32) {
        self.groups
            .entry(ns)
            .or_default()
            .push(Feature { index, value });
    }

    pub fn get(&self, ns: Namespace) -> &[Feature] {
        self.groups.get(&ns).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.groups.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|v| v.is_empty())
    }
}

/// A multi-action example: shared context plus one feature set per action.
///
/// Shared features are visible to every action. The interaction list is
/// example-wide and is what [`apply_config`] swaps per slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CbExample {
    pub shared: FeatureGroups,
    pub actions: Vec<FeatureGroups>,
    interactions: Vec<Interaction>,
}

impl CbExample {
    pub fn new(shared: FeatureGroups, actions: Vec<FeatureGroups>) -> Self {
        Self {
            shared,
            actions,
            interactions: Vec::new(),
        }
    }

    /// Interactions currently active on this example.
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Replace the example's own interaction list (outside of any slot scope).
    pub fn set_interactions(&mut self, interactions: Vec<Interaction>) {
        self.interactions = interactions;
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Distinct namespaces present anywhere in the example.
    pub fn namespaces(&self) -> BTreeSet<Namespace> {
        let mut out: BTreeSet<Namespace> = self.shared.namespaces().collect();
        for a in &self.actions {
            out.extend(a.namespaces());
        }
        out
    }

    /// Namespaces visible to `action` (shared ∪ action-specific).
    pub fn action_namespaces(&self, action: usize) -> BTreeSet<Namespace> {
        let mut out: BTreeSet<Namespace> = self.shared.namespaces().collect();
        if let Some(a) = self.actions.get(action) {
            out.extend(a.namespaces());
        }
        out
    }

    /// Features of `ns` visible to `action`, shared ones first.
    pub fn features(&self, action: usize, ns: Namespace) -> impl Iterator<Item = &Feature> + '_ {
        let own: &[Feature] = self.actions.get(action).map(|a| a.get(ns)).unwrap_or(&[]);
        self.shared.get(ns).iter().chain(own.iter())
    }
}

/// Logged bandit feedback for the action that was actually played.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoggedFeedback {
    /// Observed cost of the logged action.
    pub cost: f32,
    /// Probability with which the logging policy chose that action.
    pub probability: f32,
}

/// Score for one action (lower is better; the first entry is the greedy choice).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionScore {
    pub action: usize,
    pub score: f32,
}

pub type ActionScores = Vec<ActionScore>;

/// Scoped projection of an example onto one slot's interaction list.
///
/// Created by [`apply_config`]. The original interaction list is restored
/// when the scope drops, so consecutive slots can never observe each other's
/// projection.
pub struct InteractionScope<'a> {
    example: &'a mut CbExample,
    stash: &'a mut Vec<Interaction>,
}

impl Deref for InteractionScope<'_> {
    type Target = CbExample;

    fn deref(&self) -> &CbExample {
        &*self.example
    }
}

impl Drop for InteractionScope<'_> {
    fn drop(&mut self) {
        std::mem::swap(&mut self.example.interactions, self.stash);
    }
}

/// Project `example` onto `live_interactions` for the lifetime of the
/// returned scope.
///
/// The two lists are swapped in place (no copy); while the scope is alive
/// `live_interactions` holds the example's own list.
pub fn apply_config<'a>(
    example: &'a mut CbExample,
    live_interactions: &'a mut Vec<Interaction>,
) -> InteractionScope<'a> {
    std::mem::swap(&mut example.interactions, live_interactions);
    InteractionScope {
        example,
        stash: live_interactions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ex() -> CbExample {
        let shared = FeatureGroups::new().with(Namespace(b'u'), 1, 1.0);
        let actions = vec![
            FeatureGroups::new().with(Namespace(b'x'), 10, 1.0),
            FeatureGroups::new().with(Namespace(b'x'), 11, 0.5),
        ];
        let mut e = CbExample::new(shared, actions);
        e.set_interactions(vec![Interaction::from("ux")]);
        e
    }

    #[test]
    fn apply_config_projects_and_restores() {
        let mut e = ex();
        let mut live = vec![Interaction::from("uu"), Interaction::from("xx")];
        {
            let scoped = apply_config(&mut e, &mut live);
            assert_eq!(scoped.interactions().len(), 2);
            assert_eq!(scoped.interactions()[0], Interaction::from("uu"));
        }
        assert_eq!(e.interactions(), &[Interaction::from("ux")]);
        assert_eq!(live.len(), 2, "slot list is handed back intact");
    }

    #[test]
    fn shared_features_are_visible_to_every_action() {
        let e = ex();
        assert_eq!(e.features(1, Namespace(b'u')).count(), 1);
        assert_eq!(e.features(1, Namespace(b'x')).next().unwrap().index, 11);
        assert_eq!(e.features(5, Namespace(b'x')).count(), 0);
    }

    #[test]
    fn namespaces_are_union_of_shared_and_actions() {
        let e = ex();
        let ns: Vec<u8> = e.namespaces().into_iter().map(|n| n.0).collect();
        assert_eq!(ns, vec![b'u', b'x']);
    }
}
