//! `ixsel`: online feature-interaction selection for streaming contextual bandits.
//!
//! While a learner consumes an unbounded stream of multi-action examples,
//! `ixsel` searches, in the same pass, for the set of cross-feature terms
//! ("interactions") worth keeping. Each hypothesis is *the full interaction
//! universe minus an exclusion set*; a small pool of them trains side by side
//! on one shared weight array, and a challenger replaces the incumbent
//! champion only when a confidence-interval test says it is better.
//!
//! ```text
//! let mut automl = AutoMl::new(AutoMlConfig::default())?;
//! for (mut ex, logged, action) in stream {
//!     let scores = automl.one_step(&mut base, &mut ex, &logged, action)?;
//! }
//! ```
//!
//! **Pieces:**
//! - [`FeatureInteractionSet`]: an exclusion set, its lease and its [`ConfigState`].
//! - [`EstimatorPair`] / [`ConfidenceSequence`]: per-slot reward estimates and
//!   the [`better`] / [`worse`] comparisons.
//! - [`CandidateOracle`]: candidate generation ([`OracleType`]) and priorities
//!   ([`PriorityType`], or any [`PriorityFn`]).
//! - [`ConfigManager`]: the pool; admission, eviction, promotion and
//!   weight-slot reclamation over a [`WeightArena`].
//! - [`AutoMl`]: the per-example driver and its Collecting/Experimenting
//!   state machine.
//!
//! **Collaborators** (replaceable, consumed through small seams):
//! - [`BaseLearner`], with [`SgdCbLearner`] as a reference implementation.
//! - [`ModelBuffer`] for checkpoints, with [`IoBuf`] in memory.
//! - [`RandState`] for deterministic candidate draws.
//!
//! **Guarantees:**
//! - **Deterministic**: same config, seed and stream give the same champion.
//! - **No cross-slot leakage**: a slot's weights are zeroed whenever its
//!   occupant changes, and learners only see their own partition.
//! - **Resumable**: a checkpoint restores configs, estimators, namespace
//!   counts, random position and weights exactly.
//!
//! **Non-goals:** exploration policies and the host's own checkpoint format.

#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod namespace;
pub use namespace::*;

mod stable_hash;
pub use stable_hash::*;

mod example;
pub use example::*;

mod rand_state;
pub use rand_state::*;

mod persist;
pub use persist::{IoBuf, ModelBuffer, Persist, MAX_RECORD_BYTES};

mod config_set;
pub use config_set::*;

mod estimator;
pub use estimator::*;

mod weights;
pub use weights::*;

mod learner;
pub use learner::*;

mod oracle;
pub use oracle::*;

mod config;
pub use config::*;

mod manager;
pub use manager::*;

mod automl;
pub use automl::*;
