#![forbid(unsafe_code)]

/// Validation bounds and sizing limits shared by the fold and the gate.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidationLimits {
    /// Highest accepted agent id (inclusive).
    pub agent_id_max: u64,
    /// Highest accepted X location (inclusive). The lower bound is zero.
    pub location_x_max: u64,
    /// Lowest accepted Y location (inclusive).
    pub location_y_min: u64,
    /// Highest accepted Y location (inclusive).
    pub location_y_max: u64,
    /// Maximum number of messages folded by a single chain submission.
    pub max_chain_messages: usize,
    /// Maximum commit records retained by the gate before the oldest are evicted.
    pub max_commit_records: usize,
}

/// Default limits used throughout the watermark components.
pub const DEFAULT_LIMITS: ValidationLimits = ValidationLimits {
    agent_id_max: 3000,
    location_x_max: 15000,
    location_y_min: 5000,
    location_y_max: 20000,
    max_chain_messages: 4096,
    max_commit_records: 1024,
};

impl ValidationLimits {
    /// Canonical little-endian encoding of the fields that govern message validity.
    ///
    /// Sizing limits are excluded: they bound work, not the transition rule.
    pub fn ruleset_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&self.agent_id_max.to_le_bytes());
        out[8..16].copy_from_slice(&self.location_x_max.to_le_bytes());
        out[16..24].copy_from_slice(&self.location_y_min.to_le_bytes());
        out[24..32].copy_from_slice(&self.location_y_max.to_le_bytes());
        out
    }
}

impl Default for ValidationLimits {
    fn default() -> Self {
        default_limits()
    }
}

/// Convenience helper returning the default validation limits.
pub const fn default_limits() -> ValidationLimits {
    DEFAULT_LIMITS
}
