//! Attestation submission and voting-round derivation.

use std::sync::Arc;

use alloy_primitives::B256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;

use paystream_attest::abi::{
    firstVotingRoundStartTsCall, getRequestFeeCall, requestAttestationCall,
    votingEpochDurationSecondsCall,
};
use paystream_attest::{EpochParams, RequestDescriptor, VotingRound};
use paystream_types::{SubmissionRecord, SubmissionStatus};

use crate::{
    error::ClientError,
    registry::{self, ContractRegistry},
    wallet::TxSender,
};

/// Outcome of a successful attestation submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: B256,
    pub block_number: u64,
    /// The round that will answer the request, derived from the including
    /// block's timestamp.
    pub round: VotingRound,
}

/// Submits descriptors to the attestation network and derives their round.
#[async_trait]
pub trait RequestSubmitter: Send + Sync {
    async fn submit(&self, descriptor: &RequestDescriptor) -> Result<Submission, ClientError>;
}

/// Persistence seam for broadcast reconciliation. The record is written
/// before a transaction leaves the process and updated once the outcome is
/// known, so an interrupted run never double-pays the fee.
pub trait SubmissionStore: Send + Sync {
    fn record(&self, record: &SubmissionRecord) -> Result<(), ClientError>;
    fn update_status(
        &self,
        descriptor_hash: &[u8; 32],
        status: SubmissionStatus,
        round: Option<u64>,
    ) -> Result<(), ClientError>;
    fn load(&self, descriptor_hash: &[u8; 32]) -> Result<Option<SubmissionRecord>, ClientError>;
}

/// In-memory no-op store for callers that do not persist runs.
pub struct NullSubmissionStore;

impl SubmissionStore for NullSubmissionStore {
    fn record(&self, _record: &SubmissionRecord) -> Result<(), ClientError> {
        Ok(())
    }

    fn update_status(
        &self,
        _descriptor_hash: &[u8; 32],
        _status: SubmissionStatus,
        _round: Option<u64>,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    fn load(&self, _descriptor_hash: &[u8; 32]) -> Result<Option<SubmissionRecord>, ClientError> {
        Ok(None)
    }
}

/// Resolves the fee, submits the descriptor, and computes the voting round
/// from the inclusion block timestamp and the network's epoch parameters.
pub struct RoundScheduler {
    registry: Arc<ContractRegistry>,
    tx: Arc<TxSender>,
    store: Arc<dyn SubmissionStore>,
}

impl RoundScheduler {
    pub fn new(
        registry: Arc<ContractRegistry>,
        tx: Arc<TxSender>,
        store: Arc<dyn SubmissionStore>,
    ) -> Self {
        Self { registry, tx, store }
    }

    /// Fetch the network's epoch parameters. Never hardcoded; they differ
    /// between networks and deployments.
    pub async fn epoch_params(&self) -> Result<EpochParams, ClientError> {
        let manager = self.registry.resolve(registry::SYSTEMS_MANAGER).await?;

        let raw = self.tx.rpc().call(manager, &firstVotingRoundStartTsCall {}.abi_encode()).await?;
        let first = firstVotingRoundStartTsCall::abi_decode_returns(&raw)
            .map_err(|e| ClientError::Rpc(format!("malformed epoch anchor: {e}")))?;

        let raw =
            self.tx.rpc().call(manager, &votingEpochDurationSecondsCall {}.abi_encode()).await?;
        let duration = votingEpochDurationSecondsCall::abi_decode_returns(&raw)
            .map_err(|e| ClientError::Rpc(format!("malformed epoch duration: {e}")))?;

        if duration == 0 {
            return Err(ClientError::Config("epoch duration of zero".to_string()));
        }

        Ok(EpochParams { first_round_start_ts: first, round_duration_secs: duration })
    }

    /// Current submission fee for this exact descriptor. The fee varies by
    /// descriptor, so it is resolved per submission, never cached.
    pub async fn request_fee(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<alloy_primitives::U256, ClientError> {
        let fee_config = self
            .registry
            .resolve(registry::FEE_CONFIGURATION)
            .await
            .map_err(|e| ClientError::Fee(e.to_string()))?;
        let call = getRequestFeeCall { data: descriptor.0.clone() };
        let raw = self
            .tx
            .rpc()
            .call(fee_config, &call.abi_encode())
            .await
            .map_err(|e| ClientError::Fee(e.to_string()))?;
        getRequestFeeCall::abi_decode_returns(&raw).map_err(|e| ClientError::Fee(e.to_string()))
    }

    /// Check whether an earlier broadcast for this descriptor already
    /// landed. Returns the reconciled submission when it did.
    pub async fn reconcile(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<Submission>, ClientError> {
        let hash = descriptor.hash();
        let Some(record) = self.store.load(&hash.0)? else { return Ok(None) };
        if record.status == SubmissionStatus::Failed {
            return Ok(None);
        }

        let tx_hash = B256::from(record.tx_hash);
        let Some(receipt) = self.tx.rpc().transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        if !receipt.status_ok {
            self.store.update_status(&hash.0, SubmissionStatus::Failed, None)?;
            return Ok(None);
        }

        let round = self.round_for_block(receipt.block_number).await?;
        self.store.update_status(&hash.0, SubmissionStatus::Confirmed, Some(round.0))?;
        Ok(Some(Submission { tx_hash, block_number: receipt.block_number, round }))
    }

    async fn round_for_block(&self, block_number: u64) -> Result<VotingRound, ClientError> {
        let params = self.epoch_params().await?;
        let ts = self.tx.rpc().block_timestamp(block_number).await?;
        Ok(VotingRound::from_timestamp(ts, &params))
    }
}

#[async_trait]
impl RequestSubmitter for RoundScheduler {
    async fn submit(&self, descriptor: &RequestDescriptor) -> Result<Submission, ClientError> {
        // A prior broadcast that already landed must not be paid for twice.
        if let Some(previous) = self.reconcile(descriptor).await? {
            tracing::info!(
                target: "paystream::scheduler",
                tx = %previous.tx_hash,
                round = previous.round.0,
                "reusing reconciled submission"
            );
            return Ok(previous);
        }

        let fee = self.request_fee(descriptor).await?;
        let hub = self.registry.resolve(registry::ATTESTATION_HUB).await?;
        let call = requestAttestationCall { data: descriptor.0.clone() };

        let descriptor_hash = descriptor.hash();
        let signed = self.tx.sign_call(hub, fee, call.abi_encode().into()).await?;
        self.store.record(&SubmissionRecord::new(descriptor_hash.0, signed.tx_hash.0))?;

        let tx_hash = match self.tx.broadcast(&signed).await {
            Ok(hash) => hash,
            // Transport failure after signing: the transaction may still
            // have reached the network.
            Err(ClientError::Http(_)) => {
                return Err(ClientError::AmbiguousBroadcast { tx_hash: signed.tx_hash })
            }
            Err(ClientError::Rpc(reason)) => {
                self.store.update_status(&descriptor_hash.0, SubmissionStatus::Failed, None)?;
                return Err(ClientError::SubmissionRejected(reason));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            target: "paystream::scheduler",
            tx = %tx_hash,
            fee = %fee,
            "attestation request broadcast"
        );

        let receipt = self.tx.wait_receipt(tx_hash).await?;
        if !receipt.status_ok {
            self.store.update_status(&descriptor_hash.0, SubmissionStatus::Failed, None)?;
            return Err(ClientError::SubmissionRejected(format!("transaction {tx_hash} reverted")));
        }

        let round = self.round_for_block(receipt.block_number).await?;
        self.store.update_status(&descriptor_hash.0, SubmissionStatus::Confirmed, Some(round.0))?;

        tracing::info!(
            target: "paystream::scheduler",
            round = round.0,
            block = receipt.block_number,
            "submission included"
        );

        Ok(Submission { tx_hash, block_number: receipt.block_number, round })
    }
}
