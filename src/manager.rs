//! The config pool: admission scheduling, champion promotion and weight-slot
//! reclamation.
//!
//! ## Slots
//!
//! The manager owns `max_live_configs` slots. Slot `s` is, at the same time:
//!
//! - `estimators[s]`: the slot's [`EstimatorPair`] (`None` when empty),
//! - partition `s` of the shared [`WeightArena`],
//! - `aux[s]`: the slot's [`SlotAux`] learner totals.
//!
//! Slot 0 always holds the champion. Moving a config between slots moves all
//! three together.
//!
//! ## Accounting
//!
//! Every config ever created is in exactly one of: the index queue
//! (New/Inactive), a slot (Live), or retired (Removed). Handles are indices
//! into `configs` and are never reused.

use crate::persist::{
    read_bool, read_f32, read_len, read_u128, read_u64, read_u8, write_bool, write_f32, write_u128,
    write_u64, write_u8,
};
use crate::{
    apply_config, better, clear_non_champ_weights, count_namespaces, exclusions_to_string,
    gen_interactions, worse, ActionScores, AutoMlConfig, AutoMlError, BaseLearner, CandidateOracle,
    CbExample, ConfigState, EstimatorPair, FeatureInteractionSet, IndexQueue, Interaction,
    InteractionType, LoggedFeedback, ModelBuffer, Namespace, NamespaceCounter, OracleContext,
    OracleType, Persist, PriorityFn, RandState, SlotAux, SlotMetrics, WeightArena,
};

/// Hard cap on simultaneously live configs (champion included).
pub const MAX_CONFIGS: usize = 10;

/// Admitting scheduling passes without a champion change before the oracle
/// falls back to random exploration.
pub const CONFIGS_PER_CHAMP_CHANGE: u64 = 10;

const MAX_PERSISTED_CONFIGS: u64 = 1 << 24;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub(crate) total_champ_switches: u64,
    pub(crate) total_learn_count: u64,
    current_champ: usize,
    passes_since_champ_change: u64,

    max_live_configs: usize,
    priority_challengers: usize,
    eval_horizon: u64,
    alpha: f64,
    tau: f64,
    lb_trick: bool,
    ccb_on: bool,
    interaction_type: InteractionType,

    oracle: CandidateOracle,
    ns_counter: NamespaceCounter,
    configs: Vec<FeatureInteractionSet>,
    estimators: Vec<Option<EstimatorPair>>,
    index_queue: IndexQueue,
    weights: WeightArena,
    aux: Vec<SlotAux>,
}

impl ConfigManager {
    /// Build a manager with a single champion that excludes nothing.
    pub fn new(
        cfg: &AutoMlConfig,
        calc_priority: PriorityFn,
        rand_state: RandState,
    ) -> Result<Self, AutoMlError> {
        if cfg.max_live_configs == 0 || cfg.max_live_configs > MAX_CONFIGS {
            return Err(AutoMlError::config(format!(
                "max_live_configs must be in 1..={MAX_CONFIGS}, got {}",
                cfg.max_live_configs
            )));
        }
        let mut oracle = CandidateOracle::new(
            cfg.oracle_type,
            cfg.interaction_type,
            calc_priority,
            cfg.global_lease,
            rand_state,
        );
        oracle.batch = cfg.max_live_configs.saturating_sub(1).max(1);

        let mut champ = oracle.generate();
        champ.state = ConfigState::Live;
        let ns_counter = NamespaceCounter::new();
        let live = gen_interactions(cfg.interaction_type, cfg.ccb_on, &ns_counter, &champ.exclusions);

        let mut estimators = vec![None; cfg.max_live_configs];
        estimators[0] = Some(EstimatorPair::new(
            cfg.significance_level,
            cfg.estimator_decay,
            0,
            live,
        ));

        Ok(Self {
            total_champ_switches: 0,
            total_learn_count: 0,
            current_champ: 0,
            passes_since_champ_change: 0,
            max_live_configs: cfg.max_live_configs,
            priority_challengers: cfg.priority_challenger_slots(),
            eval_horizon: cfg.eval_horizon,
            alpha: cfg.significance_level,
            tau: cfg.estimator_decay,
            lb_trick: cfg.lb_trick,
            ccb_on: cfg.ccb_on,
            interaction_type: cfg.interaction_type,
            oracle,
            ns_counter,
            configs: vec![champ],
            estimators,
            index_queue: IndexQueue::new(),
            weights: WeightArena::new(cfg.weight_bits, cfg.max_live_configs, cfg.stride)?,
            aux: vec![SlotAux::default(); cfg.max_live_configs],
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn total_champ_switches(&self) -> u64 {
        self.total_champ_switches
    }

    pub fn total_learn_count(&self) -> u64 {
        self.total_learn_count
    }

    /// Handle of the champion config.
    pub fn current_champ(&self) -> usize {
        self.current_champ
    }

    pub fn passes_since_champ_change(&self) -> u64 {
        self.passes_since_champ_change
    }

    pub fn max_live_configs(&self) -> usize {
        self.max_live_configs
    }

    /// Challenger slots `1..=n` admit by priority; the rest admit the
    /// longest-waiting candidate.
    pub fn priority_challengers(&self) -> usize {
        self.priority_challengers
    }

    pub fn configs(&self) -> &[FeatureInteractionSet] {
        &self.configs
    }

    pub fn estimators(&self) -> &[Option<EstimatorPair>] {
        &self.estimators
    }

    pub fn ns_counter(&self) -> &NamespaceCounter {
        &self.ns_counter
    }

    pub fn index_queue(&self) -> &IndexQueue {
        &self.index_queue
    }

    pub fn weights(&self) -> &WeightArena {
        &self.weights
    }

    pub fn aux(&self) -> &[SlotAux] {
        &self.aux
    }

    pub fn oracle(&self) -> &CandidateOracle {
        &self.oracle
    }

    /// Interactions the champion currently trains with.
    pub fn champion_interactions(&self) -> &[Interaction] {
        self.estimators
            .first()
            .and_then(|e| e.as_ref())
            .map(|e| e.challenger.live_interactions.as_slice())
            .unwrap_or(&[])
    }

    /// Occupied slots in ascending order.
    pub fn live_slots(&self) -> Vec<usize> {
        self.estimators
            .iter()
            .enumerate()
            .filter_map(|(s, e)| e.as_ref().map(|_| s))
            .collect()
    }

    /// Mutable access for callers that seed or inspect state directly (tests,
    /// tooling). Run [`check_invariants`](Self::check_invariants) afterwards.
    pub fn estimators_mut(&mut self) -> &mut [Option<EstimatorPair>] {
        &mut self.estimators
    }

    pub fn weights_mut(&mut self) -> &mut WeightArena {
        &mut self.weights
    }

    // ========================================================================
    // Stream bookkeeping
    // ========================================================================

    /// Count the example's namespaces; on a new namespace, re-materialize every
    /// live slot's interactions. Returns whether a namespace was new.
    pub fn pre_process(&mut self, example: &CbExample) -> bool {
        self.total_learn_count = self.total_learn_count.saturating_add(1);
        let new_ns = count_namespaces(example.namespaces(), &mut self.ns_counter);
        if new_ns {
            for pair in self.estimators.iter_mut().flatten() {
                let handle = pair.challenger.config_index as usize;
                if let Some(cfg) = self.configs.get(handle) {
                    pair.challenger.live_interactions = gen_interactions(
                        self.interaction_type,
                        self.ccb_on,
                        &self.ns_counter,
                        &cfg.exclusions,
                    );
                }
            }
            log::debug!(
                "new namespace observed; {} namespaces known",
                self.ns_counter.len()
            );
        }
        new_ns
    }

    /// Run `base` on one slot with the example projected onto that slot's
    /// interactions.
    pub fn learn_slot<L: BaseLearner + ?Sized>(
        &mut self,
        slot: usize,
        base: &mut L,
        example: &mut CbExample,
        logged: &LoggedFeedback,
        logged_action: usize,
    ) -> Result<ActionScores, AutoMlError> {
        let pair = self
            .estimators
            .get_mut(slot)
            .and_then(|e| e.as_mut())
            .ok_or_else(|| AutoMlError::invariant(format!("learn on empty slot {slot}")))?;
        let aux = &mut self.aux[slot];
        let mut view = self.weights.slot_view(slot)?;
        let scoped = apply_config(example, &mut pair.challenger.live_interactions);
        let scores = base.learn(&mut view, aux, &scoped, logged, logged_action);
        drop(scoped);
        log::trace!("slot {slot} learned; greedy={:?}", scores.first().map(|s| s.action));
        Ok(scores)
    }

    /// Update every live slot's estimators from the logged reward.
    ///
    /// `greedy` maps each learned slot to the action it would have played.
    /// Each slot's horizon is charged with the champion's importance weight on
    /// the same example.
    pub fn record_feedback(
        &mut self,
        greedy: &[(usize, usize)],
        reward: f64,
        logged_action: usize,
        probability: f32,
    ) {
        let champ_action = greedy.iter().find(|(s, _)| *s == 0).map(|(_, a)| *a);
        let w_champ = champ_action
            .map(|a| crate::importance_weight(a, logged_action, probability))
            .unwrap_or(0.0);
        for &(slot, action) in greedy {
            if let Some(Some(pair)) = self.estimators.get_mut(slot) {
                let w = crate::importance_weight(action, logged_action, probability);
                pair.observe(w, reward);
                pair.observe_champion(self.lb_trick, w_champ, reward);
            }
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Highest-priority pending handle (earliest inserted among ties).
    pub fn choose(index_queue: &mut IndexQueue) -> Option<usize> {
        index_queue.pop().map(|(_, handle)| handle)
    }

    /// Recompute `eligible_to_inactivate` for every live estimator.
    ///
    /// A challenger is eligible once it has `eval_horizon` samples (under
    /// `lb_trick`, on both sides of the comparison). The champion's own slot
    /// is never eligible. Returns whether any slot is eligible.
    pub fn swap_eligible_to_inactivate(
        lb_trick: bool,
        estimators: &mut [Option<EstimatorPair>],
        eval_horizon: u64,
    ) -> bool {
        let mut any = false;
        for (slot, pair) in estimators.iter_mut().enumerate() {
            if let Some(pair) = pair {
                let eligible = slot != 0 && pair.evidence_count(lb_trick) >= eval_horizon;
                pair.challenger.eligible_to_inactivate = eligible;
                any |= eligible;
            }
        }
        any
    }

    /// Ask the oracle for more candidates.
    ///
    /// After [`CONFIGS_PER_CHAMP_CHANGE`] admitting passes without a champion
    /// change, the configured policy is replaced by random exploration.
    pub fn repopulate_index_queue(&mut self) -> usize {
        let kind = if self.passes_since_champ_change >= CONFIGS_PER_CHAMP_CHANGE {
            OracleType::Rand
        } else {
            self.oracle.kind
        };
        let mut ctx = OracleContext {
            configs: &mut self.configs,
            index_queue: &mut self.index_queue,
            ns_counter: &self.ns_counter,
        };
        self.oracle
            .do_work_as(kind, &mut ctx, &self.estimators, self.current_champ)
    }

    /// Evict finished challengers, then fill empty slots from the queue.
    ///
    /// Priority slots (`1..=priority_challengers`) take the highest-priority
    /// candidate; later slots take the one that has waited longest.
    pub fn schedule(&mut self) -> Result<(), AutoMlError> {
        Self::swap_eligible_to_inactivate(self.lb_trick, &mut self.estimators, self.eval_horizon);

        // -- Step 1: evict --
        for slot in 1..self.max_live_configs {
            let Some(pair) = &self.estimators[slot] else {
                continue;
            };
            if !pair.challenger.eligible_to_inactivate
                || better(self.lb_trick, &pair.challenger.stats, &pair.champion_horizon)
            {
                continue;
            }
            let dominated = worse(self.lb_trick, &pair.challenger.stats, &pair.champion_horizon);
            let handle = pair.config_index() as usize;
            self.vacate(slot);

            let Some(cfg) = self.configs.get_mut(handle) else {
                return Err(AutoMlError::invariant(format!(
                    "slot {slot} held unknown config {handle}"
                )));
            };
            let state = if dominated {
                cfg.state = ConfigState::Removed;
                ConfigState::Removed
            } else {
                cfg.charge_eviction()
            };
            if state == ConfigState::Inactive {
                let priority = self.oracle.calc_priority(&self.configs[handle], &self.ns_counter);
                if priority == f32::NEG_INFINITY {
                    self.configs[handle].state = ConfigState::Removed;
                } else {
                    self.index_queue.push(priority, handle);
                }
            }
            log::debug!(
                "evicted config {handle} from slot {slot} -> {}",
                self.configs[handle].state
            );
        }

        // -- Step 2: admit --
        let mut repopulated = false;
        let mut admitted = 0usize;
        for slot in 1..self.max_live_configs {
            if self.estimators[slot].is_some() {
                continue;
            }
            if self.index_queue.is_empty() && !repopulated {
                repopulated = true;
                self.repopulate_index_queue();
            }
            let next = if slot <= self.priority_challengers {
                Self::choose(&mut self.index_queue)
            } else {
                self.index_queue.pop_oldest().map(|(_, handle)| handle)
            };
            let Some(handle) = next else {
                break;
            };
            self.admit(slot, handle)?;
            admitted += 1;
        }
        if admitted > 0 {
            self.passes_since_champ_change = self.passes_since_champ_change.saturating_add(1);
        }
        Ok(())
    }

    fn vacate(&mut self, slot: usize) {
        self.estimators[slot] = None;
        self.weights.clear_slot(slot);
        self.aux[slot].reset();
    }

    /// Move a pending config into an empty slot with fresh estimators and
    /// zeroed weights.
    pub fn admit(&mut self, slot: usize, handle: usize) -> Result<(), AutoMlError> {
        if slot == 0 || slot >= self.max_live_configs {
            return Err(AutoMlError::invariant(format!(
                "cannot admit into slot {slot} (cap {})",
                self.max_live_configs
            )));
        }
        if self.estimators[slot].is_some() {
            return Err(AutoMlError::invariant(format!("slot {slot} is occupied")));
        }
        let cfg = self
            .configs
            .get(handle)
            .ok_or_else(|| AutoMlError::invariant(format!("unknown config {handle}")))?;
        if !cfg.state.is_pending() {
            return Err(AutoMlError::invariant(format!(
                "config {handle} is {} and cannot be admitted",
                cfg.state
            )));
        }
        if !cfg.allow_dups
            && self.configs.iter().enumerate().any(|(h, c)| {
                h != handle && c.state == ConfigState::Live && !c.allow_dups && c.exclusions == cfg.exclusions
            })
        {
            return Err(AutoMlError::invariant(format!(
                "config {handle} duplicates a live exclusion set {}",
                exclusions_to_string(&cfg.exclusions)
            )));
        }

        self.weights.clear_slot(slot);
        self.aux[slot].reset();
        let live = gen_interactions(self.interaction_type, self.ccb_on, &self.ns_counter, &cfg.exclusions);
        log::debug!(
            "admitting config {handle} {} into slot {slot}",
            exclusions_to_string(&cfg.exclusions)
        );
        self.estimators[slot] = Some(EstimatorPair::new(self.alpha, self.tau, handle as u64, live));
        self.configs[handle].state = ConfigState::Live;
        Ok(())
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    /// Promote the first eligible challenger that beats its champion horizon.
    ///
    /// Returns whether the champion changed.
    pub fn update_champ(&mut self) -> Result<bool, AutoMlError> {
        Self::swap_eligible_to_inactivate(self.lb_trick, &mut self.estimators, self.eval_horizon);

        let winner = (1..self.max_live_configs).find(|&s| match &self.estimators[s] {
            Some(p) => {
                p.challenger.eligible_to_inactivate
                    && better(self.lb_trick, &p.challenger.stats, &p.champion_horizon)
            }
            None => false,
        });
        let Some(slot) = winner else {
            return Ok(false);
        };

        let old_champ = self.current_champ;
        self.estimators.swap(0, slot);
        self.weights.swap_slots(0, slot);
        self.aux.swap(0, slot);
        let new_champ = match &self.estimators[0] {
            Some(p) => p.config_index() as usize,
            None => return Err(AutoMlError::invariant("promoted an empty slot")),
        };
        self.current_champ = new_champ;
        self.total_champ_switches = self.total_champ_switches.saturating_add(1);
        self.passes_since_champ_change = 0;

        for (s, pair) in self.estimators.iter_mut().enumerate() {
            let Some(pair) = pair else { continue };
            if s == 0 {
                pair.champion_horizon.reset_stats();
                pair.challenger.eligible_to_inactivate = false;
            } else {
                pair.reset_stats();
            }
        }
        clear_non_champ_weights(&mut self.weights, self.max_live_configs, self.max_live_configs)?;
        for aux in self.aux.iter_mut().skip(1) {
            aux.reset();
        }

        log::info!(
            "champion switch #{}: config {old_champ} -> {new_champ} {}",
            self.total_champ_switches,
            exclusions_to_string(&self.configs[new_champ].exclusions)
        );

        let mut ctx = OracleContext {
            configs: &mut self.configs,
            index_queue: &mut self.index_queue,
            ns_counter: &self.ns_counter,
        };
        self.oracle.do_work(&mut ctx, &self.estimators, self.current_champ);
        Ok(true)
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Verify pool accounting and slot occupancy.
    pub fn check_invariants(&self) -> Result<(), AutoMlError> {
        if self.max_live_configs > MAX_CONFIGS || self.estimators.len() != self.max_live_configs {
            return Err(AutoMlError::invariant(format!(
                "{} slots for cap {} (max {MAX_CONFIGS})",
                self.estimators.len(),
                self.max_live_configs
            )));
        }
        match &self.estimators[0] {
            Some(p) if p.config_index() as usize == self.current_champ => {}
            _ => return Err(AutoMlError::invariant("slot 0 does not hold the champion")),
        }

        let mut slot_of = vec![None; self.configs.len()];
        for (slot, pair) in self.estimators.iter().enumerate() {
            let Some(pair) = pair else { continue };
            let h = pair.config_index() as usize;
            match self.configs.get(h) {
                Some(c) if c.state == ConfigState::Live => {}
                _ => {
                    return Err(AutoMlError::invariant(format!(
                        "slot {slot} holds config {h} which is not live"
                    )))
                }
            }
            if slot_of[h].replace(slot).is_some() {
                return Err(AutoMlError::invariant(format!("config {h} occupies two slots")));
            }
        }

        let mut queued = vec![false; self.configs.len()];
        for h in self.index_queue.handles() {
            match self.configs.get(h) {
                Some(c) if c.state.is_pending() => {}
                _ => {
                    return Err(AutoMlError::invariant(format!(
                        "queued config {h} is not New or Inactive"
                    )))
                }
            }
            if std::mem::replace(&mut queued[h], true) {
                return Err(AutoMlError::invariant(format!("config {h} is queued twice")));
            }
        }

        let mut live = 0;
        let mut removed = 0;
        for (h, c) in self.configs.iter().enumerate() {
            match c.state {
                ConfigState::Live => {
                    live += 1;
                    if slot_of[h].is_none() {
                        return Err(AutoMlError::invariant(format!("live config {h} has no slot")));
                    }
                }
                ConfigState::Removed => removed += 1,
                _ => {}
            }
        }
        if live > self.max_live_configs {
            return Err(AutoMlError::invariant(format!(
                "{live} live configs above cap {}",
                self.max_live_configs
            )));
        }
        if self.index_queue.len() + live + removed != self.configs.len() {
            return Err(AutoMlError::invariant(format!(
                "queue {} + live {live} + removed {removed} != {} configs",
                self.index_queue.len(),
                self.configs.len()
            )));
        }

        let live_sets: Vec<&FeatureInteractionSet> = self
            .configs
            .iter()
            .filter(|c| c.state == ConfigState::Live && !c.allow_dups)
            .collect();
        for (i, a) in live_sets.iter().enumerate() {
            if live_sets[i + 1..].iter().any(|b| b.exclusions == a.exclusions) {
                return Err(AutoMlError::invariant(format!(
                    "duplicate live exclusion set {}",
                    exclusions_to_string(&a.exclusions)
                )));
            }
        }
        Ok(())
    }

    /// Per-slot diagnostic snapshot.
    pub fn slot_metrics(&self) -> Vec<SlotMetrics> {
        self.estimators
            .iter()
            .enumerate()
            .filter_map(|(slot, e)| e.as_ref().map(|p| (slot, p)))
            .map(|(slot, p)| {
                let handle = p.config_index() as usize;
                SlotMetrics {
                    slot,
                    config_index: handle,
                    lease: self.configs.get(handle).map(|c| c.lease).unwrap_or(0),
                    update_count: p.challenger.stats.update_count(),
                    ips: p.challenger.stats.current_ips(),
                    lower_bound: p.challenger.stats.lower_bound(),
                    upper_bound: p.challenger.stats.upper_bound(),
                    eligible_to_inactivate: p.challenger.eligible_to_inactivate,
                    exclusions: self
                        .configs
                        .get(handle)
                        .map(|c| exclusions_to_string(&c.exclusions))
                        .unwrap_or_default(),
                    interaction_count: p.challenger.live_interactions.len(),
                }
            })
            .collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Append the manager's checkpoint fields.
    ///
    /// With `predict_only`, only the champion survives: other live configs
    /// are written as Inactive and their slots as empty.
    pub fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B, predict_only: bool) -> usize {
        let mut n = write_u64(buf, self.configs.len() as u64);
        for (h, c) in self.configs.iter().enumerate() {
            if predict_only && h != self.current_champ && c.state == ConfigState::Live {
                let mut demoted = c.clone();
                demoted.state = ConfigState::Inactive;
                n += demoted.write_to(buf);
            } else {
                n += c.write_to(buf);
            }
        }

        n += write_u64(buf, self.estimators.len() as u64);
        for (slot, pair) in self.estimators.iter().enumerate() {
            match pair {
                Some(p) if !predict_only || slot == 0 => {
                    n += write_bool(buf, true);
                    n += p.write_to(buf);
                }
                _ => n += write_bool(buf, false),
            }
        }

        n += write_u64(buf, self.total_champ_switches);
        n += write_u64(buf, self.total_learn_count);
        n += write_u64(buf, self.current_champ as u64);
        n += write_u64(buf, self.ns_counter.len() as u64);
        for (ns, count) in &self.ns_counter {
            n += write_u8(buf, ns.0);
            n += write_u64(buf, *count);
        }

        let (next_seq, entries) = self.queue_to_save(predict_only);
        n += write_u64(buf, next_seq);
        n += write_u64(buf, entries.len() as u64);
        for (priority, seq, handle) in entries {
            n += write_f32(buf, priority);
            n += write_u64(buf, seq);
            n += write_u64(buf, handle as u64);
        }

        n += write_u64(buf, self.passes_since_champ_change);
        n += write_u64(buf, self.oracle.rand_state().seed());
        n += write_u128(buf, self.oracle.rand_state().word_pos());
        n += write_u64(buf, self.aux.len() as u64);
        for (slot, aux) in self.aux.iter().enumerate() {
            if predict_only && slot != 0 {
                n += SlotAux::default().write_to(buf);
            } else {
                n += aux.write_to(buf);
            }
        }
        n += self
            .weights
            .write_filtered(buf, |slot| !predict_only || slot == 0);
        n
    }

    /// Queue entries as saved. A predict-only save demotes live challengers
    /// to Inactive, so they are queued behind everything already waiting.
    fn queue_to_save(&self, predict_only: bool) -> (u64, Vec<(f32, u64, usize)>) {
        let mut entries = self.index_queue.entries();
        let mut next_seq = self.index_queue.next_seq();
        if predict_only {
            for (h, c) in self.configs.iter().enumerate() {
                if h != self.current_champ && c.state == ConfigState::Live {
                    entries.push((self.oracle.calc_priority(c, &self.ns_counter), next_seq, h));
                    next_seq += 1;
                }
            }
        }
        (next_seq, entries)
    }

    /// Rebuild a manager from checkpoint fields written by [`write_to`](Self::write_to).
    ///
    /// The index queue is restored entry for entry, sequence numbers included.
    pub fn read_from<B: ModelBuffer + ?Sized>(
        buf: &mut B,
        cfg: &AutoMlConfig,
        calc_priority: PriorityFn,
    ) -> Result<Self, AutoMlError> {
        let mut m = Self::new(cfg, calc_priority, RandState::new(cfg.random_seed))?;

        let n_configs = read_len(buf, "configs.len", MAX_PERSISTED_CONFIGS)?;
        let mut configs = Vec::with_capacity(n_configs);
        for _ in 0..n_configs {
            configs.push(FeatureInteractionSet::read_from(buf)?);
        }

        let n_slots = read_len(buf, "estimators.len", MAX_CONFIGS as u64)?;
        if n_slots != m.max_live_configs {
            return Err(AutoMlError::decode(format!(
                "checkpoint has {n_slots} slots, configuration expects {}",
                m.max_live_configs
            )));
        }
        let mut estimators = Vec::with_capacity(n_slots);
        for _ in 0..n_slots {
            if read_bool(buf, "estimators.present")? {
                estimators.push(Some(EstimatorPair::read_from(buf)?));
            } else {
                estimators.push(None);
            }
        }

        m.total_champ_switches = read_u64(buf, "total_champ_switches")?;
        m.total_learn_count = read_u64(buf, "total_learn_count")?;
        m.current_champ = read_len(buf, "current_champ", MAX_PERSISTED_CONFIGS)?;
        let n_ns = read_len(buf, "ns_counter.len", 256)?;
        let mut ns_counter = NamespaceCounter::new();
        for _ in 0..n_ns {
            let ns = Namespace(read_u8(buf, "ns_counter.ns")?);
            let count = read_u64(buf, "ns_counter.count")?;
            ns_counter.insert(ns, count);
        }

        let next_seq = read_u64(buf, "queue.next_seq")?;
        let n_queued = read_len(buf, "queue.len", MAX_PERSISTED_CONFIGS)?;
        let mut entries = Vec::with_capacity(n_queued);
        for _ in 0..n_queued {
            let priority = read_f32(buf, "queue.priority")?;
            let seq = read_u64(buf, "queue.seq")?;
            let handle = read_len(buf, "queue.handle", MAX_PERSISTED_CONFIGS)?;
            entries.push((priority, seq, handle));
        }
        let index_queue = IndexQueue::from_entries(entries, next_seq)?;

        m.passes_since_champ_change = read_u64(buf, "passes_since_champ_change")?;
        let seed = read_u64(buf, "rand.seed")?;
        let word_pos = read_u128(buf, "rand.word_pos")?;
        m.oracle.set_rand_state(RandState::at_position(seed, word_pos));
        let n_aux = read_len(buf, "aux.len", MAX_CONFIGS as u64)?;
        if n_aux != n_slots {
            return Err(AutoMlError::decode(format!(
                "{n_aux} aux entries for {n_slots} slots"
            )));
        }
        let mut aux = Vec::with_capacity(n_aux);
        for _ in 0..n_aux {
            aux.push(SlotAux::read_from(buf)?);
        }
        let weights = WeightArena::read_from(buf)?;
        if weights.wpp() != n_slots || weights.stride() != cfg.stride || weights.weight_bits() != cfg.weight_bits {
            return Err(AutoMlError::decode(
                "weight arena geometry does not match configuration",
            ));
        }

        m.configs = configs;
        m.estimators = estimators;
        m.ns_counter = ns_counter;
        m.aux = aux;
        m.weights = weights;
        m.index_queue = index_queue;

        m.check_invariants().map_err(|e| match e {
            AutoMlError::InvariantViolation(msg) => {
                AutoMlError::decode(format!("inconsistent checkpoint: {msg}"))
            }
            other => other,
        })?;
        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeatureGroups, SgdCbLearner};

    fn cfg() -> AutoMlConfig {
        AutoMlConfig::default()
            .with_max_live_configs(3)
            .with_eval_horizon(5)
            .with_weight_bits(8)
    }

    fn manager() -> ConfigManager {
        ConfigManager::new(&cfg(), crate::priority_none, RandState::new(0)).unwrap()
    }

    fn example(tags: &str) -> CbExample {
        let mut shared = FeatureGroups::new();
        for (i, t) in tags.bytes().enumerate() {
            shared.push(Namespace(t), i as u64, 1.0);
        }
        CbExample::new(shared, vec![FeatureGroups::new(), FeatureGroups::new()])
    }

    #[test]
    fn starts_with_live_champion_only() {
        let m = manager();
        assert_eq!(m.configs().len(), 1);
        assert_eq!(m.configs()[0].state, ConfigState::Live);
        assert_eq!(m.live_slots(), vec![0]);
        m.check_invariants().unwrap();
    }

    #[test]
    fn rejects_cap_above_max_configs() {
        let err = ConfigManager::new(
            &AutoMlConfig::default().with_max_live_configs(MAX_CONFIGS + 1),
            crate::priority_none,
            RandState::new(0),
        )
        .unwrap_err();
        assert!(matches!(err, AutoMlError::Configuration(_)));
    }

    #[test]
    fn pre_process_regenerates_champion_interactions() {
        let mut m = manager();
        assert!(m.pre_process(&example("ab")));
        assert_eq!(crate::interactions_to_string(m.champion_interactions()), "aa,ab,bb");
        assert!(!m.pre_process(&example("ab")));
        assert_eq!(m.total_learn_count(), 2);
    }

    #[test]
    fn schedule_fills_slots_in_ascending_order() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.schedule().unwrap();
        assert_eq!(m.live_slots(), vec![0, 1, 2]);
        // OneDiff over {aa, ab, bb}: three candidates, two admitted.
        assert_eq!(m.configs().len(), 4);
        assert_eq!(m.index_queue().len(), 1);
        assert_eq!(m.estimators()[1].as_ref().unwrap().config_index(), 1);
        assert_eq!(m.passes_since_champ_change(), 1);
        m.check_invariants().unwrap();
    }

    #[test]
    fn eligibility_is_idempotent_and_never_marks_champion() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.schedule().unwrap();
        for pair in m.estimators_mut().iter_mut().flatten() {
            for _ in 0..5 {
                pair.observe(1.0, 0.5);
                pair.observe_champion(false, 1.0, 0.5);
            }
        }
        let mut est = m.estimators().to_vec();
        assert!(ConfigManager::swap_eligible_to_inactivate(false, &mut est, 5));
        let once = est.clone();
        ConfigManager::swap_eligible_to_inactivate(false, &mut est, 5);
        assert_eq!(est, once);
        assert!(!est[0].as_ref().unwrap().challenger.eligible_to_inactivate);
        assert!(est[1].as_ref().unwrap().challenger.eligible_to_inactivate);
    }

    #[test]
    fn tied_challenger_is_evicted_and_requeued_with_lease_charged() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.schedule().unwrap();
        for pair in m.estimators_mut().iter_mut().flatten() {
            for _ in 0..5 {
                pair.observe(1.0, 0.5);
                pair.observe_champion(false, 1.0, 0.5);
            }
        }
        m.schedule().unwrap();
        // Both challengers evicted; the waiting candidate and one of the
        // evicted ones are admitted.
        assert_eq!(m.configs()[1].lease, 9);
        assert_eq!(m.configs()[2].lease, 9);
        assert_eq!(m.estimators()[1].as_ref().unwrap().config_index(), 3);
        m.check_invariants().unwrap();
    }

    #[test]
    fn dominated_challenger_is_removed() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.schedule().unwrap();
        let pair = m.estimators_mut()[1].as_mut().unwrap();
        for _ in 0..2000 {
            pair.observe(1.0, 0.0);
            pair.observe_champion(false, 1.0, 1.0);
        }
        m.schedule().unwrap();
        assert_eq!(m.configs()[1].state, ConfigState::Removed);
        m.check_invariants().unwrap();
    }

    #[test]
    fn stale_champion_switches_repopulation_to_random_until_next_swap() {
        let c = AutoMlConfig::default()
            .with_max_live_configs(2)
            .with_eval_horizon(1)
            .with_global_lease(1)
            .with_weight_bits(8);
        let mut m = ConfigManager::new(&c, crate::priority_none, RandState::new(5)).unwrap();
        m.pre_process(&example("abcd"));
        assert_eq!(m.champion_interactions().len(), 10);

        // Each pass retires the tied challenger and admits the next single-term edit.
        let tie = |m: &mut ConfigManager| {
            if let Some(pair) = m.estimators_mut()[1].as_mut() {
                pair.observe(1.0, 0.5);
                pair.observe_champion(false, 1.0, 0.5);
            }
        };
        for pass in 1..=CONFIGS_PER_CHAMP_CHANGE {
            tie(&mut m);
            m.schedule().unwrap();
            assert_eq!(m.passes_since_champ_change(), pass);
        }
        assert_eq!(m.configs().len(), 11);
        assert!(m.index_queue().is_empty());
        assert!(m.configs()[1..].iter().all(|c| c.exclusions.len() == 1));

        // Every single-term edit is retired, so OneDiff would queue all ten
        // again; the random oracle makes one batch of one.
        tie(&mut m);
        m.schedule().unwrap();
        assert_eq!(m.configs().len(), 12);
        assert_eq!(m.estimators()[1].as_ref().unwrap().config_index(), 11);
        m.check_invariants().unwrap();

        let pair = m.estimators_mut()[1].as_mut().unwrap();
        for _ in 0..2000 {
            pair.observe(1.0, 1.0);
            pair.observe_champion(false, 1.0, 0.0);
        }
        let before = m.configs().len();
        assert!(m.update_champ().unwrap());
        assert_eq!(m.current_champ(), 11);
        assert_eq!(m.passes_since_champ_change(), 0);

        let champ = m.configs()[11].exclusions.clone();
        let fresh = &m.configs()[before..];
        assert!(!fresh.is_empty());
        for cand in fresh {
            assert_eq!(cand.exclusions.symmetric_difference(&champ).count(), 1);
        }
        m.check_invariants().unwrap();
    }

    #[test]
    fn later_slots_admit_the_longest_waiting_candidate() {
        let c = cfg().with_priority_challengers(1);
        let mut m = ConfigManager::new(&c, crate::priority_favor_popular_namespaces, RandState::new(0))
            .unwrap();
        m.pre_process(&example("ab"));
        m.pre_process(&example("a"));
        // Candidates {aa}, {ab}, {bb} score -4, -3, -2.
        m.schedule().unwrap();
        let admitted: Vec<u64> = m.estimators()[1..]
            .iter()
            .map(|p| p.as_ref().unwrap().config_index())
            .collect();
        assert_eq!(admitted, vec![3, 1]);
        assert_eq!(m.index_queue().peek().map(|(_, h)| h), Some(2));
        m.check_invariants().unwrap();
    }

    #[test]
    fn invariants_reject_a_config_queued_twice_or_while_live() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.repopulate_index_queue();
        m.check_invariants().unwrap();

        let mut twice = m.clone();
        twice.index_queue.push(0.0, 1);
        assert!(twice.check_invariants().is_err());

        let mut live = m.clone();
        live.index_queue.push(0.0, 0);
        assert!(live.check_invariants().is_err());
    }

    #[test]
    fn admit_rejects_duplicate_live_set() {
        let mut m = manager();
        m.pre_process(&example("ab"));
        m.configs.push(FeatureInteractionSet::new(Default::default(), 10, false));
        let err = m.admit(1, 1).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn learn_slot_touches_only_its_partition() {
        let mut m = manager();
        let mut ex = example("ab");
        m.pre_process(&ex);
        m.schedule().unwrap();
        let mut base = SgdCbLearner::default();
        let logged = LoggedFeedback { cost: 1.0, probability: 0.5 };
        m.learn_slot(2, &mut base, &mut ex, &logged, 0).unwrap();
        assert!(m.weights().slot_is_zero(0));
        assert!(m.weights().slot_is_zero(1));
        assert!(!m.weights().slot_is_zero(2));
        assert!(ex.interactions().is_empty(), "projection restored");
        assert!(m.learn_slot(5, &mut base, &mut ex, &logged, 0).is_err());
    }
}
