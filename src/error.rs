//! Error taxonomy for the selection core.
//!
//! There is no transient category: every operation is deterministic given the
//! example stream, the random seed and the checkpoint, so nothing here is
//! worth retrying.

use thiserror::Error;

/// Errors surfaced by [`AutoMl`](crate::AutoMl) and [`ConfigManager`](crate::ConfigManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutoMlError {
    /// Incompatible or invalid host configuration.
    ///
    /// Raised during construction, before any example is processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal consistency failure (slot cap exceeded, duplicate live
    /// exclusion sets, a write outside a slot's weight partition).
    ///
    /// Fatal: the run must stop rather than keep writing into the shared
    /// weight arena.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Checkpoint fields are malformed or out of the expected order.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl AutoMlError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        AutoMlError::InvariantViolation(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        AutoMlError::Configuration(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        AutoMlError::Deserialization(msg.into())
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AutoMlError::InvariantViolation(_))
    }
}
