//! Feature-group tags ("namespaces"), interaction tuples and the interaction
//! universe a champion or challenger is built from.
//!
//! Every hypothesis the selector runs is "the full interaction universe minus
//! an exclusion set". The universe is derived from the namespaces observed on
//! the stream so far ([`NamespaceCounter`]) and the configured
//! [`InteractionType`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::AutoMlError;

/// Opaque identifier of a group of input features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Namespace(pub u8);

/// Bias / intercept features. Never counted, never excluded.
pub const CONSTANT_NAMESPACE: Namespace = Namespace(128);
/// Slot features of a conditional-contextual-bandit example.
pub const CCB_SLOT_NAMESPACE: Namespace = Namespace(139);
/// Slot-id namespace appended to every interaction when `ccb_on` is set.
pub const CCB_ID_NAMESPACE: Namespace = Namespace(140);
/// Namespace for features given without an explicit group.
pub const DEFAULT_NAMESPACE: Namespace = Namespace(b' ');

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "[{}]", self.0)
        }
    }
}

/// Ordered tuple of namespaces defining one cross-feature term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interaction(pub Vec<Namespace>);

impl Interaction {
    pub fn new(namespaces: impl IntoIterator<Item = Namespace>) -> Self {
        Self(namespaces.into_iter().collect())
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `"ab"` is the interaction between namespaces `a` and `b`.
impl From<&str> for Interaction {
    fn from(tags: &str) -> Self {
        Self(tags.bytes().map(Namespace).collect())
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ns in &self.0 {
            write!(f, "{ns}")?;
        }
        Ok(())
    }
}

/// Observed frequency per namespace across the stream (counts never decrease).
pub type NamespaceCounter = BTreeMap<Namespace, u64>;

/// Interactions suppressed relative to the full universe.
pub type Exclusions = BTreeSet<Interaction>;

/// Arity of the generated interaction universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InteractionType {
    /// All unordered pairs, self-pairs included.
    #[default]
    Quadratic,
    /// All unordered triples, repeats included.
    Cubic,
}

impl InteractionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::Quadratic => "quadratic",
            InteractionType::Cubic => "cubic",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            InteractionType::Quadratic => 2,
            InteractionType::Cubic => 3,
        }
    }
}

impl FromStr for InteractionType {
    type Err = AutoMlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quadratic" => Ok(InteractionType::Quadratic),
            "cubic" => Ok(InteractionType::Cubic),
            other => Err(AutoMlError::config(format!(
                "unknown interaction type '{other}' (expected quadratic or cubic)"
            ))),
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the selector may count and exclude `ns`.
pub fn is_allowed_to_remove(ns: Namespace) -> bool {
    ns != CONSTANT_NAMESPACE && ns != CCB_SLOT_NAMESPACE && ns != CCB_ID_NAMESPACE
}

/// Add one observation for every distinct removable namespace in `namespaces`.
///
/// Returns `true` if any namespace was seen for the first time.
pub fn count_namespaces(
    namespaces: impl IntoIterator<Item = Namespace>,
    ns_counter: &mut NamespaceCounter,
) -> bool {
    let distinct: BTreeSet<Namespace> = namespaces
        .into_iter()
        .filter(|ns| is_allowed_to_remove(*ns))
        .collect();
    let mut new_ns_seen = false;
    for ns in distinct {
        let c = ns_counter.entry(ns).or_insert(0);
        *c = c.saturating_add(1);
        new_ns_seen |= *c == 1;
    }
    new_ns_seen
}

/// Every interaction of `interaction_type` over the namespaces in `ns_counter`,
/// in lexicographic order.
pub fn interaction_universe(
    interaction_type: InteractionType,
    ns_counter: &NamespaceCounter,
) -> Vec<Interaction> {
    let ns: Vec<Namespace> = ns_counter
        .keys()
        .copied()
        .filter(|n| is_allowed_to_remove(*n))
        .collect();
    let mut out = Vec::new();
    match interaction_type {
        InteractionType::Quadratic => {
            for i in 0..ns.len() {
                for j in i..ns.len() {
                    out.push(Interaction(vec![ns[i], ns[j]]));
                }
            }
        }
        InteractionType::Cubic => {
            for i in 0..ns.len() {
                for j in i..ns.len() {
                    for k in j..ns.len() {
                        out.push(Interaction(vec![ns[i], ns[j], ns[k]]));
                    }
                }
            }
        }
    }
    out
}

/// Materialize the live interaction list for a hypothesis: the universe minus
/// `exclusions`, plus a slot-id copy of every term when `ccb_on`.
pub fn gen_interactions(
    interaction_type: InteractionType,
    ccb_on: bool,
    ns_counter: &NamespaceCounter,
    exclusions: &Exclusions,
) -> Vec<Interaction> {
    let mut live: Vec<Interaction> = interaction_universe(interaction_type, ns_counter)
        .into_iter()
        .filter(|i| !exclusions.contains(i))
        .collect();
    if ccb_on {
        let with_id: Vec<Interaction> = live
            .iter()
            .map(|i| {
                let mut v = i.0.clone();
                v.push(CCB_ID_NAMESPACE);
                Interaction(v)
            })
            .collect();
        live.extend(with_id);
    }
    live
}

/// Human-readable interaction list, e.g. `ab,bb`.
pub fn interactions_to_string(interactions: &[Interaction]) -> String {
    interactions
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Human-readable exclusion set, e.g. `{ab,ac}`.
pub fn exclusions_to_string(exclusions: &Exclusions) -> String {
    let inner = exclusions
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}
