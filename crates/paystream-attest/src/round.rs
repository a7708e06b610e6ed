//! Voting-round arithmetic.

use std::fmt;

/// Epoch parameters of the attestation network. Fetched on-chain; they
/// differ between networks and deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochParams {
    /// Unix timestamp at which round 0 started.
    pub first_round_start_ts: u64,
    /// Length of one round in seconds.
    pub round_duration_secs: u64,
}

/// Identifier of one consensus time-slice.
///
/// Not created by this system: it is derived from the submission's block
/// timestamp, so it can only be known after the submission lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VotingRound(pub u64);

impl VotingRound {
    /// Round containing a block timestamp. Pure function of the epoch
    /// parameters; `round_duration_secs` must be non-zero (validated where
    /// the parameters are fetched).
    pub fn from_timestamp(block_ts: u64, params: &EpochParams) -> Self {
        Self(block_ts.saturating_sub(params.first_round_start_ts) / params.round_duration_secs)
    }
}

impl fmt::Display for VotingRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
