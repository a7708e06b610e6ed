//! Attestation response decoding and claim-proof assembly.

use alloy_primitives::{Bytes, B256};
use alloy_sol_types::SolValue;
use thiserror::Error;

use crate::abi::{UnitCountTask, WireProof, WireResponse};

/// Raw payload served by the data-availability layer once a round is final.
/// Valid only for one `(round, request)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofPayload {
    /// Sibling hashes, leaf to root. Depth varies with the round's
    /// response-set size.
    pub merkle_path: Vec<B256>,
    /// ABI-encoded response tuple.
    pub response: Bytes,
}

/// Decode failures are fatal for a run; the offending bytes are preserved
/// for offline diagnosis, never coerced.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("response payload does not match the agreed schema ({reason}): 0x{}", hex::encode(.raw))]
    Schema { reason: String, raw: Vec<u8> },

    #[error("unit count field is malformed: 0x{}", hex::encode(.raw))]
    UnitCount { raw: Vec<u8> },
}

/// Decode the opaque response bytes into the typed settlement structure.
pub fn decode_response(raw: &[u8]) -> Result<WireResponse, ProofError> {
    WireResponse::abi_decode(raw)
        .map_err(|e| ProofError::Schema { reason: e.to_string(), raw: raw.to_vec() })
}

/// Extract the numeric unit count from a decoded response.
pub fn unit_count(data: &WireResponse) -> Result<u64, ProofError> {
    let raw: &[u8] = data.responseBody.abiEncodedData.as_ref();
    let task =
        UnitCountTask::abi_decode(raw).map_err(|_| ProofError::UnitCount { raw: raw.to_vec() })?;
    Ok(task.commitCount.try_into().unwrap_or(u64::MAX))
}

/// A single-use claim proof: inclusion path plus decoded response, in
/// exactly the shape the settlement claim entry point requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimProof {
    pub merkle_path: Vec<B256>,
    pub data: WireResponse,
}

impl ClaimProof {
    /// Assemble from a retrieved payload.
    pub fn assemble(payload: &ProofPayload) -> Result<Self, ProofError> {
        let data = decode_response(&payload.response)?;
        Ok(Self { merkle_path: payload.merkle_path.clone(), data })
    }

    pub fn depth(&self) -> usize {
        self.merkle_path.len()
    }

    /// Unit count the claim will pay for, extracted independently so a
    /// caller can display it before committing the claim transaction.
    pub fn unit_count(&self) -> Result<u64, ProofError> {
        unit_count(&self.data)
    }

    /// Wire form for the settlement claim call.
    pub fn to_wire(&self) -> WireProof {
        WireProof { merkleProof: self.merkle_path.clone(), data: self.data.clone() }
    }
}
