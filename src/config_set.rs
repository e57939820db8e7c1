//! Candidate hypotheses: an exclusion set plus its lifecycle bookkeeping.
//!
//! A [`FeatureInteractionSet`] is data only. The manager moves it through
//! [`ConfigState`] and charges its lease; nothing here decides policy.

use std::fmt;

use crate::persist::{read_bool, read_interactions, read_u64, read_u8, write_bool, write_interactions, write_u64, write_u8};
use crate::{AutoMlError, Exclusions, ModelBuffer, Persist};

/// Admission budget handed to every new candidate unless configured otherwise.
pub const DEFAULT_LEASE: u64 = 10;

/// Lifecycle of a candidate.
///
/// `New -> Live -> Inactive <-> Live`, and any state `-> Removed`.
/// `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfigState {
    /// Generated and queued, never admitted.
    New,
    /// Occupies a slot and is learning.
    Live,
    /// Evicted with lease remaining; queued again.
    Inactive,
    /// Retired for good.
    Removed,
}

impl ConfigState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigState::New => "New",
            ConfigState::Live => "Live",
            ConfigState::Inactive => "Inactive",
            ConfigState::Removed => "Removed",
        }
    }

    /// Waiting in the index queue.
    pub fn is_pending(self) -> bool {
        matches!(self, ConfigState::New | ConfigState::Inactive)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ConfigState::New => 0,
            ConfigState::Live => 1,
            ConfigState::Inactive => 2,
            ConfigState::Removed => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self, AutoMlError> {
        match v {
            0 => Ok(ConfigState::New),
            1 => Ok(ConfigState::Live),
            2 => Ok(ConfigState::Inactive),
            3 => Ok(ConfigState::Removed),
            x => Err(AutoMlError::decode(format!("unknown config state {x}"))),
        }
    }
}

impl fmt::Display for ConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate: the full interaction universe minus `exclusions`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureInteractionSet {
    pub exclusions: Exclusions,
    /// Evictions left before the set is retired.
    pub lease: u64,
    pub state: ConfigState,
    /// Inserted as a deliberate duplicate of another set.
    pub allow_dups: bool,
}

impl FeatureInteractionSet {
    pub fn new(exclusions: Exclusions, lease: u64, allow_dups: bool) -> Self {
        Self {
            exclusions,
            lease,
            state: ConfigState::New,
            allow_dups,
        }
    }

    /// Charge one eviction against the lease and move to the resulting state.
    ///
    /// Returns the new state: `Removed` once the lease is exhausted,
    /// `Inactive` otherwise.
    pub fn charge_eviction(&mut self) -> ConfigState {
        self.lease = self.lease.saturating_sub(1);
        self.state = if self.lease == 0 {
            ConfigState::Removed
        } else {
            ConfigState::Inactive
        };
        self.state
    }

    pub fn is_removed(&self) -> bool {
        self.state == ConfigState::Removed
    }
}

impl Persist for FeatureInteractionSet {
    fn write_to<B: ModelBuffer + ?Sized>(&self, buf: &mut B) -> usize {
        write_interactions(buf, self.exclusions.iter())
            + write_u64(buf, self.lease)
            + write_u8(buf, self.state.to_u8())
            + write_bool(buf, self.allow_dups)
    }

    fn read_from<B: ModelBuffer + ?Sized>(buf: &mut B) -> Result<Self, AutoMlError> {
        let list = read_interactions(buf, "config.exclusions")?;
        let n = list.len();
        let exclusions: Exclusions = list.into_iter().collect();
        if exclusions.len() != n {
            return Err(AutoMlError::decode("config.exclusions contains duplicates"));
        }
        let lease = read_u64(buf, "config.lease")?;
        let state = ConfigState::from_u8(read_u8(buf, "config.state")?)?;
        let allow_dups = read_bool(buf, "config.allow_dups")?;
        Ok(Self {
            exclusions,
            lease,
            state,
            allow_dups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interaction, IoBuf};

    #[test]
    fn eviction_charges_lease_until_removed() {
        let mut c = FeatureInteractionSet::new(Exclusions::new(), 2, false);
        c.state = ConfigState::Live;
        assert_eq!(c.charge_eviction(), ConfigState::Inactive);
        assert_eq!(c.lease, 1);
        c.state = ConfigState::Live;
        assert_eq!(c.charge_eviction(), ConfigState::Removed);
        assert_eq!(c.lease, 0);
        // Saturates instead of wrapping.
        assert_eq!(c.charge_eviction(), ConfigState::Removed);
    }

    #[test]
    fn state_names() {
        assert_eq!(ConfigState::Inactive.to_string(), "Inactive");
        assert!(ConfigState::New.is_pending());
        assert!(!ConfigState::Live.is_pending());
        assert!(ConfigState::from_u8(9).is_err());
    }

    #[test]
    fn persisted_set_reads_back() {
        let mut ex = Exclusions::new();
        ex.insert(Interaction::from("ab"));
        let mut c = FeatureInteractionSet::new(ex, 7, true);
        c.state = ConfigState::Inactive;

        let mut b = IoBuf::new();
        c.write_to(&mut b);
        let mut r = IoBuf::from_bytes(b.into_bytes());
        assert_eq!(FeatureInteractionSet::read_from(&mut r).unwrap(), c);
    }
}
