//! Async client for the verified-claim pipeline and payout relay.
//!
//! The pipeline turns a work-evidence observation into a settled escrow
//! claim in six strictly ordered steps:
//! - Build the canonical attestation request (pure, in `paystream-attest`)
//! - Encode it into a submittable descriptor via the preparer service
//! - Submit it with the network fee and derive the answering voting round
//! - Poll the finality registry until that round is final
//! - Poll the data-availability layer for the response and inclusion path
//! - Assemble the claim proof and submit the settlement claim
//!
//! The relay forwarder runs independently, mirroring confirmed settlement
//! events into receipts on a second ledger with idempotent writes.
//!
//! # Quick Start
//!
//! ```ignore
//! use paystream_client::{ClaimPipeline, PipelineEvent};
//! use paystream_attest::WorkSource;
//!
//! let pipeline = ClaimPipeline::builder()
//!     .preparer(preparer)
//!     .submitter(submitter)
//!     .oracle(oracle)
//!     .proof_source(proofs)
//!     .ledger(ledger)
//!     .build()
//!     .start();
//!
//! let mut events = pipeline.subscribe();
//! let source = WorkSource::GitRepository { repo: "octocat/hello-world".into() };
//! let confirmed = pipeline.run(0, &source).await?;
//! ```

pub mod controller;
pub mod da;
pub mod error;
pub mod finality;
pub mod payroll;
pub mod registry;
pub mod relay;
pub mod rpc;
pub mod scheduler;
pub mod verifier;
pub mod wallet;

#[cfg(test)]
mod tests;

pub use controller::{ClaimPipeline, ClaimPipelineConfig, PipelineEvent, RunState};
pub use error::ClientError;
pub use finality::{ChainFinality, FinalityOracle, FinalizationPoller, PollOptions};
pub use payroll::{ClaimConfirmed, PayrollContract, SettlementLedger, StreamInfo};
pub use relay::{source_event_id, CursorStore, PayoutSink, RelayEvent, RelayForwarder};
pub use rpc::ChainRpc;
pub use scheduler::{RequestSubmitter, RoundScheduler, Submission, SubmissionStore};
pub use verifier::{RequestPreparer, VerifierClient};
pub use wallet::TxSender;
