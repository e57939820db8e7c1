//! Candidate generation: which exclusion sets to try next, and in what order.
//!
//! The oracle is a tagged policy ([`OracleType`]) over shared state it does not
//! own. The manager lends it the config pool, the pending [`IndexQueue`] and
//! the namespace counts through an [`OracleContext`] for the duration of one
//! call.
//!
//! Determinism: candidate order depends only on the champion, the namespace
//! counts and the oracle's [`RandState`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use crate::{
    interaction_universe, is_allowed_to_remove, AutoMlError, ConfigState, EstimatorPair, Exclusions,
    FeatureInteractionSet, InteractionType, NamespaceCounter, RandState,
};

// ============================================================================
// Priorities
// ============================================================================

/// Scores a candidate; higher is admitted first. `-inf` means never admit.
pub type PriorityFn = fn(&FeatureInteractionSet, &NamespaceCounter) -> f32;

/// Every candidate is equally urgent (FIFO admission).
pub fn priority_none(_set: &FeatureInteractionSet, _ns_counter: &NamespaceCounter) -> f32 {
    0.0
}

/// Prefer candidates whose exclusions touch rarely seen namespaces.
///
/// Each excluded term costs the observation count of every namespace in it,
/// so dropping interactions over popular namespaces is tried last.
pub fn priority_favor_popular_namespaces(
    set: &FeatureInteractionSet,
    ns_counter: &NamespaceCounter,
) -> f32 {
    let mut priority = 0.0f32;
    for inter in &set.exclusions {
        for ns in inter.namespaces() {
            priority -= ns_counter.get(ns).copied().unwrap_or(0) as f32;
        }
    }
    priority
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PriorityType {
    #[default]
    None,
    FavorPopularNamespaces,
}

impl PriorityType {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityType::None => "none",
            PriorityType::FavorPopularNamespaces => "favor_popular_namespaces",
        }
    }

    pub fn priority_fn(self) -> PriorityFn {
        match self {
            PriorityType::None => priority_none,
            PriorityType::FavorPopularNamespaces => priority_favor_popular_namespaces,
        }
    }
}

impl FromStr for PriorityType {
    type Err = AutoMlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PriorityType::None),
            "favor_popular_namespaces" => Ok(PriorityType::FavorPopularNamespaces),
            other => Err(AutoMlError::config(format!("unknown priority type '{other}'"))),
        }
    }
}

impl fmt::Display for PriorityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Index queue
// ============================================================================

#[derive(Debug, Clone)]
struct QueueEntry {
    priority: f32,
    seq: u64,
    handle: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Max-heap on priority; among equals the earlier insertion wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-priority queue of pending config handles with FIFO tie-breaking.
///
/// Every entry carries the sequence number it was pushed with. Entries and
/// `next_seq` are checkpointed verbatim, so a restored queue pops in exactly
/// the order the saved one would have.
#[derive(Debug, Clone, Default)]
pub struct IndexQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl IndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: f32, handle: usize) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(QueueEntry {
            priority,
            seq,
            handle,
        });
    }

    /// Highest priority, earliest inserted among ties.
    pub fn pop(&mut self) -> Option<(f32, usize)> {
        self.heap.pop().map(|e| (e.priority, e.handle))
    }

    /// Earliest inserted entry, whatever its priority.
    pub fn pop_oldest(&mut self) -> Option<(f32, usize)> {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let oldest = entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.seq)
            .map(|(i, _)| i);
        let popped = oldest.map(|i| entries.swap_remove(i));
        self.heap = BinaryHeap::from(entries);
        popped.map(|e| (e.priority, e.handle))
    }

    pub fn peek(&self) -> Option<(f32, usize)> {
        self.heap.peek().map(|e| (e.priority, e.handle))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued handles, unordered.
    pub fn handles(&self) -> impl Iterator<Item = usize> + '_ {
        self.heap.iter().map(|e| e.handle)
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// `(priority, seq, handle)` for every entry, in insertion order.
    pub fn entries(&self) -> Vec<(f32, u64, usize)> {
        let mut out: Vec<_> = self
            .heap
            .iter()
            .map(|e| (e.priority, e.seq, e.handle))
            .collect();
        out.sort_by_key(|&(_, seq, _)| seq);
        out
    }

    /// Rebuild a queue from saved [`entries`](Self::entries).
    ///
    /// Fails when a sequence number repeats or is not below `next_seq`.
    pub fn from_entries(
        entries: Vec<(f32, u64, usize)>,
        next_seq: u64,
    ) -> Result<Self, AutoMlError> {
        let mut seen = std::collections::BTreeSet::new();
        let mut heap = BinaryHeap::with_capacity(entries.len());
        for (priority, seq, handle) in entries {
            if seq >= next_seq || !seen.insert(seq) {
                return Err(AutoMlError::decode(format!(
                    "queue entry for config {handle} has bad sequence number {seq}"
                )));
            }
            heap.push(QueueEntry {
                priority,
                seq,
                handle,
            });
        }
        Ok(Self { heap, next_seq })
    }
}

// ============================================================================
// Oracle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OracleType {
    /// Random subsets of the interaction universe.
    Rand,
    /// Single-term edits of the champion.
    #[default]
    OneDiff,
    /// The champion's own exclusions, as an independent replica.
    ChampDupe,
}

impl OracleType {
    pub fn as_str(self) -> &'static str {
        match self {
            OracleType::Rand => "rand",
            OracleType::OneDiff => "one_diff",
            OracleType::ChampDupe => "champdupe",
        }
    }
}

impl FromStr for OracleType {
    type Err = AutoMlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rand" => Ok(OracleType::Rand),
            "one_diff" => Ok(OracleType::OneDiff),
            "champdupe" => Ok(OracleType::ChampDupe),
            other => Err(AutoMlError::config(format!(
                "unknown oracle type '{other}' (expected one_diff, rand or champdupe)"
            ))),
        }
    }
}

impl fmt::Display for OracleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager state lent to the oracle for one call.
pub struct OracleContext<'a> {
    pub configs: &'a mut Vec<FeatureInteractionSet>,
    pub index_queue: &'a mut IndexQueue,
    pub ns_counter: &'a NamespaceCounter,
}

/// Random candidates to aim for per call.
const DEFAULT_RAND_BATCH: usize = 3;
/// Draw attempts per wanted random candidate before giving up.
const RAND_ATTEMPTS_PER_CANDIDATE: usize = 4;

#[derive(Clone)]
pub struct CandidateOracle {
    pub kind: OracleType,
    pub interaction_type: InteractionType,
    calc_priority: PriorityFn,
    pub global_lease: u64,
    rand_state: RandState,
    /// Random candidates generated per call.
    pub batch: usize,
}

impl fmt::Debug for CandidateOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateOracle")
            .field("kind", &self.kind)
            .field("interaction_type", &self.interaction_type)
            .field("global_lease", &self.global_lease)
            .field("rand_state", &self.rand_state)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl CandidateOracle {
    pub fn new(
        kind: OracleType,
        interaction_type: InteractionType,
        calc_priority: PriorityFn,
        global_lease: u64,
        rand_state: RandState,
    ) -> Self {
        Self {
            kind,
            interaction_type,
            calc_priority,
            global_lease,
            rand_state,
            batch: DEFAULT_RAND_BATCH,
        }
    }

    pub fn rand_state(&self) -> &RandState {
        &self.rand_state
    }

    pub(crate) fn set_rand_state(&mut self, rand_state: RandState) {
        self.rand_state = rand_state;
    }

    pub fn calc_priority(&self, set: &FeatureInteractionSet, ns_counter: &NamespaceCounter) -> f32 {
        (self.calc_priority)(set, ns_counter)
    }

    /// The seed configuration: nothing excluded.
    pub fn generate(&self) -> FeatureInteractionSet {
        FeatureInteractionSet::new(Exclusions::new(), self.global_lease, false)
    }

    /// Run the configured policy. Returns how many configs were queued.
    pub fn do_work(
        &mut self,
        ctx: &mut OracleContext<'_>,
        estimators: &[Option<EstimatorPair>],
        current_champ: usize,
    ) -> usize {
        self.do_work_as(self.kind, ctx, estimators, current_champ)
    }

    /// Run a specific policy regardless of the configured one.
    pub fn do_work_as(
        &mut self,
        kind: OracleType,
        ctx: &mut OracleContext<'_>,
        estimators: &[Option<EstimatorPair>],
        current_champ: usize,
    ) -> usize {
        let Some(champ) = ctx.configs.get(current_champ) else {
            return 0;
        };
        let champ_exclusions = champ.exclusions.clone();
        let before = ctx.index_queue.len();

        match kind {
            OracleType::Rand => {
                let universe = interaction_universe(self.interaction_type, ctx.ns_counter);
                if !universe.is_empty() {
                    let mut made = 0;
                    for _ in 0..self.batch * RAND_ATTEMPTS_PER_CANDIDATE {
                        if made >= self.batch {
                            break;
                        }
                        let mut ex = Exclusions::new();
                        for inter in &universe {
                            if self.rand_state.get_and_update_random() < 0.5 {
                                ex.insert(inter.clone());
                            }
                        }
                        if self.insert_config(ctx, ex, false).is_some() {
                            made += 1;
                        }
                    }
                }
            }
            OracleType::OneDiff => {
                let live = estimators
                    .first()
                    .and_then(|e| e.as_ref())
                    .map(|e| e.challenger.live_interactions.clone())
                    .unwrap_or_default();
                for inter in live {
                    if !inter.namespaces().iter().all(|ns| is_allowed_to_remove(*ns))
                        || champ_exclusions.contains(&inter)
                    {
                        continue;
                    }
                    let mut ex = champ_exclusions.clone();
                    ex.insert(inter);
                    self.insert_config(ctx, ex, false);
                }
                for inter in &champ_exclusions {
                    let mut ex = champ_exclusions.clone();
                    ex.remove(inter);
                    self.insert_config(ctx, ex, false);
                }
            }
            OracleType::ChampDupe => {
                self.insert_config(ctx, champ_exclusions, true);
            }
        }

        let queued = ctx.index_queue.len() - before;
        log::debug!("oracle {kind} queued {queued} candidates (champ={current_champ})");
        queued
    }

    /// Create a config for `exclusions` and queue it by priority.
    ///
    /// Returns the new handle, or `None` when `allow_dups` is false and a
    /// non-Removed config already carries the same exclusions. A `-inf`
    /// priority creates the config directly as Removed.
    pub fn insert_config(
        &mut self,
        ctx: &mut OracleContext<'_>,
        exclusions: Exclusions,
        allow_dups: bool,
    ) -> Option<usize> {
        if !allow_dups
            && ctx
                .configs
                .iter()
                .any(|c| !c.is_removed() && c.exclusions == exclusions)
        {
            return None;
        }
        let mut set = FeatureInteractionSet::new(exclusions, self.global_lease, allow_dups);
        let priority = self.calc_priority(&set, ctx.ns_counter);
        let handle = ctx.configs.len();
        if priority == f32::NEG_INFINITY {
            set.state = ConfigState::Removed;
            ctx.configs.push(set);
            return Some(handle);
        }
        ctx.configs.push(set);
        ctx.index_queue.push(priority, handle);
        Some(handle)
    }
}
