//! Shared types for the paystream crate family.

use serde::{Deserialize, Serialize};

/// Lifecycle of a persisted attestation submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Broadcast; inclusion outcome not yet known.
    Broadcast,
    /// Included with a successful status.
    Confirmed,
    /// Rejected or reverted; the descriptor may be resubmitted.
    Failed,
}

/// Record of one attestation-request broadcast, keyed by descriptor hash.
///
/// Written before the transaction leaves the process, so an interrupted run
/// can check whether the non-refundable fee was already paid instead of
/// blindly paying it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// keccak256 of the encoded request descriptor.
    pub descriptor_hash: [u8; 32],
    /// Hash of the broadcast transaction.
    pub tx_hash: [u8; 32],
    /// Voting round derived after inclusion, once known.
    pub voting_round: Option<u64>,
    pub status: SubmissionStatus,
    /// Unix timestamp of the broadcast attempt.
    pub submitted_at: u64,
}

impl SubmissionRecord {
    pub fn new(descriptor_hash: [u8; 32], tx_hash: [u8; 32]) -> Self {
        Self {
            descriptor_hash,
            tx_hash,
            voting_round: None,
            status: SubmissionStatus::Broadcast,
            submitted_at: unix_now(),
        }
    }
}

/// Last fully processed source block of the relay forwarder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelayCursor {
    pub last_block: u64,
    pub updated_at: u64,
}

impl RelayCursor {
    pub fn at(last_block: u64) -> Self {
        Self { last_block, updated_at: unix_now() }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
