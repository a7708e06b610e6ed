//! Settlement-ledger client: stream reads and the claim entry point.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;

use paystream_attest::abi::{claimCall, getStreamCall, PaymentClaimed};
use paystream_attest::ClaimProof;

use crate::{error::ClientError, rpc::LogEntry, wallet::TxSender};

/// Read-only escrow stream view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub employer: Address,
    pub worker: Address,
    pub rate_per_interval: U256,
    pub claim_interval: u64,
    pub total_deposit: U256,
    pub total_claimed: U256,
    pub last_claim_time: u64,
    pub created_at: u64,
    pub active: bool,
}

impl StreamInfo {
    /// Since cursor for the work-evidence listing: the last claim time once
    /// any claim has happened, nothing for a never-claimed stream. A
    /// zero-amount claim still advances the cursor, so units are never
    /// double-counted across claims.
    pub fn since_cursor(&self) -> Option<u64> {
        (self.last_claim_time > self.created_at).then_some(self.last_claim_time)
    }
}

/// Confirmed claim settlement, decoded from the claim event. The oracle
/// price and bonus flag are outcomes of the settlement ledger, read back
/// only for display and relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimConfirmed {
    pub stream_id: U256,
    pub worker: Address,
    pub amount_native: U256,
    pub amount_usd: U256,
    pub oracle_price: U256,
    pub bonus_triggered: bool,
    pub unit_count: u64,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// The settlement ledger as the pipeline sees it: one read, one write.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn stream(&self, stream_id: u64) -> Result<StreamInfo, ClientError>;

    /// Submit the claim. This is the only step that moves funds.
    async fn claim(&self, stream_id: u64, proof: &ClaimProof) -> Result<ClaimConfirmed, ClientError>;
}

/// Chain-backed settlement ledger client.
pub struct PayrollContract {
    tx: Arc<TxSender>,
    address: Address,
}

impl PayrollContract {
    pub fn new(tx: Arc<TxSender>, address: Address) -> Self {
        Self { tx, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

/// Decode a claim-confirmed log entry.
pub fn decode_claim_event(log: &LogEntry) -> Result<ClaimConfirmed, ClientError> {
    let ev = PaymentClaimed::decode_raw_log(log.topics.iter().copied(), &log.data)
        .map_err(|e| ClientError::LogDecode(e.to_string()))?;

    Ok(ClaimConfirmed {
        stream_id: ev.streamId,
        worker: ev.worker,
        amount_native: ev.amountNative,
        amount_usd: ev.amountUsd,
        oracle_price: ev.oraclePrice,
        bonus_triggered: ev.bonusTriggered,
        unit_count: ev.unitCount.try_into().unwrap_or(u64::MAX),
        tx_hash: log.tx_hash,
        block_number: log.block_number,
        log_index: log.log_index,
    })
}

#[async_trait]
impl SettlementLedger for PayrollContract {
    async fn stream(&self, stream_id: u64) -> Result<StreamInfo, ClientError> {
        let call = getStreamCall { streamId: U256::from(stream_id) };
        let raw = self.tx.rpc().call(self.address, &call.abi_encode()).await?;
        let s = getStreamCall::abi_decode_returns(&raw)
            .map_err(|e| ClientError::Rpc(format!("malformed stream record: {e}")))?;

        Ok(StreamInfo {
            employer: s.employer,
            worker: s.worker,
            rate_per_interval: s.ratePerInterval,
            claim_interval: s.claimInterval.try_into().unwrap_or(u64::MAX),
            total_deposit: s.totalDeposit,
            total_claimed: s.totalClaimed,
            last_claim_time: s.lastClaimTime.try_into().unwrap_or(u64::MAX),
            created_at: s.createdAt.try_into().unwrap_or(u64::MAX),
            active: s.active,
        })
    }

    async fn claim(&self, stream_id: u64, proof: &ClaimProof) -> Result<ClaimConfirmed, ClientError> {
        let call = claimCall { streamId: U256::from(stream_id), proof: proof.to_wire() };
        let input: Bytes = call.abi_encode().into();

        // Gas estimation replays the claim, so a proof the ledger would
        // reject surfaces its revert reason here, before funds or fees move.
        let signed = self
            .tx
            .sign_call(self.address, U256::ZERO, input.clone())
            .await
            .map_err(|e| match e {
                ClientError::SubmissionRejected(reason) => ClientError::Reverted(reason),
                other => other,
            })?;

        let tx_hash = self.tx.broadcast(&signed).await?;
        let receipt = self.tx.wait_receipt(tx_hash).await?;

        if !receipt.status_ok {
            let reason = self
                .tx
                .rpc()
                .revert_reason(self.tx.address(), self.address, &input, receipt.block_number)
                .await
                .unwrap_or_else(|| "execution reverted".to_string());
            return Err(ClientError::Reverted(reason));
        }

        let log = receipt
            .logs
            .iter()
            .find(|l| {
                l.address == self.address
                    && l.topics.first() == Some(&PaymentClaimed::SIGNATURE_HASH)
            })
            .ok_or_else(|| {
                ClientError::LogDecode("claim receipt carries no confirmation event".to_string())
            })?;

        decode_claim_event(log)
    }
}
