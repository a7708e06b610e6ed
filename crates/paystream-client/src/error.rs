//! Error taxonomy for the claim pipeline and relay.

use alloy_primitives::B256;
use thiserror::Error;

use paystream_attest::ProofError;

/// Errors surfaced by pipeline and relay components.
///
/// The split matters operationally: transient classes may be retried after
/// the step's configured backoff, submission-fatal classes must never be
/// retried automatically, and an ambiguous broadcast must be reconciled
/// against the chain before any retry.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC node returned an error object.
    #[error("JSON-RPC error: {0}")]
    Rpc(String),

    /// Malformed JSON in a service response.
    #[error("JSON error: {0}")]
    Json(String),

    /// Attestation preparer rejected or failed the request.
    #[error("verifier error: {0}")]
    Verifier(String),

    /// Submission fee lookup failed.
    #[error("fee resolution failed: {0}")]
    Fee(String),

    /// Submission rejected before or at inclusion. The fee was not paid;
    /// the descriptor or funds are the problem, so no automatic retry.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    /// Broadcast outcome unknown. The named transaction may have landed
    /// and paid its fee; reconcile before retrying.
    #[error("broadcast outcome unknown for {tx_hash}; reconcile before retrying")]
    AmbiguousBroadcast { tx_hash: B256 },

    /// Proof payload failed to decode.
    #[error(transparent)]
    Decode(#[from] ProofError),

    /// Settlement claim reverted on-chain; no funds moved. The reason is
    /// surfaced verbatim.
    #[error("claim reverted: {0}")]
    Reverted(String),

    /// A bounded poll exceeded its caller-supplied maximum wait.
    #[error("{step} timed out after {waited_secs}s")]
    Timeout { step: &'static str, waited_secs: u64 },

    /// Poll abandoned by the caller, or a stale run superseded by a newer
    /// one for the same stream.
    #[error("{step} cancelled by caller")]
    Cancelled { step: &'static str },

    /// A pipeline run is already in flight for the stream.
    #[error("a pipeline run is already in flight for stream {0}")]
    RunInFlight(u64),

    /// A failed run must be reset before a new one may start.
    #[error("stream {0} has a failed run; reset it before starting a new one")]
    ResetRequired(u64),

    /// Event log did not decode as the expected event.
    #[error("log decode error: {0}")]
    LogDecode(String),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether a polling step may retry after its configured backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Rpc(_) | Self::Json(_) | Self::Fee(_) | Self::Verifier(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Json(e.to_string())
    }
}
