//! Attestation codec for the verified-claim pipeline.
//!
//! Everything here is pure: canonical request building, voting-round
//! arithmetic, and decoding the attestation response into the structure the
//! settlement claim expects. Network plumbing lives in `paystream-client`.

pub mod abi;

mod proof;
mod request;
mod round;

#[cfg(test)]
mod tests;

pub use proof::{decode_response, unit_count, ClaimProof, ProofError, ProofPayload};
pub use request::{
    tag_to_bytes32, AttestationRequest, RequestBody, RequestDescriptor, WorkSource,
    ATTESTATION_TYPE, SOURCE_TAG,
};
pub use round::{EpochParams, VotingRound};
