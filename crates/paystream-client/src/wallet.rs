//! Local-key transaction assembly and broadcast.

use std::time::Duration;

use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use tokio::time::{sleep, Instant};

use crate::{
    error::ClientError,
    rpc::{ChainRpc, TxReceipt},
};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECEIPT_MAX_WAIT: Duration = Duration::from_secs(120);

/// A transaction signed and hashed but not yet broadcast. Recording the
/// hash before broadcast is what makes ambiguous outcomes reconcilable.
#[derive(Debug, Clone)]
pub struct SignedCall {
    pub tx_hash: B256,
    pub raw: Vec<u8>,
}

/// Signs and broadcasts transactions for one credential on one chain.
///
/// The signer is a serialized resource per run; two pipelines for the same
/// stream must never submit concurrently (the controller enforces this).
pub struct TxSender {
    rpc: ChainRpc,
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl TxSender {
    pub fn new(rpc: ChainRpc, signer: PrivateKeySigner, chain_id: u64) -> Self {
        Self { rpc, signer, chain_id }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn rpc(&self) -> &ChainRpc {
        &self.rpc
    }

    /// Assemble and sign a call without broadcasting it.
    ///
    /// Gas estimation runs against the node first, so a call that would
    /// revert is rejected here before any fee is spent.
    pub async fn sign_call(
        &self,
        to: Address,
        value: U256,
        input: Bytes,
    ) -> Result<SignedCall, ClientError> {
        let from = self.signer.address();
        let nonce = self.rpc.transaction_count(from).await?;
        let gas_price = self.rpc.gas_price().await?;
        let estimate = self
            .rpc
            .estimate_gas(from, to, value, &input)
            .await
            .map_err(|e| ClientError::SubmissionRejected(e.to_string()))?;

        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit: estimate + estimate / 5,
            max_fee_per_gas: gas_price.saturating_mul(2),
            max_priority_fee_per_gas: gas_price,
            to: TxKind::Call(to),
            value,
            access_list: Default::default(),
            input,
        };

        let sig = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| ClientError::SubmissionRejected(format!("signing failed: {e}")))?;
        let signed = tx.into_signed(sig);
        let tx_hash = *signed.hash();
        let envelope = TxEnvelope::from(signed);

        Ok(SignedCall { tx_hash, raw: envelope.encoded_2718() })
    }

    /// Broadcast a signed call.
    pub async fn broadcast(&self, signed: &SignedCall) -> Result<B256, ClientError> {
        let hash = self.rpc.send_raw_transaction(&signed.raw).await?;
        tracing::debug!(target: "paystream::wallet", tx = %hash, "transaction broadcast");
        Ok(hash)
    }

    /// Wait for the receipt of a broadcast transaction. Transient RPC
    /// failures keep polling; passing the deadline with no receipt is an
    /// ambiguous outcome, not a failure.
    pub async fn wait_receipt(&self, tx_hash: B256) -> Result<TxReceipt, ClientError> {
        let deadline = Instant::now() + RECEIPT_MAX_WAIT;
        loop {
            match self.rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(target: "paystream::wallet", tx = %tx_hash, error = %e, "receipt poll failed");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(ClientError::AmbiguousBroadcast { tx_hash });
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    /// Sign, broadcast, and wait for inclusion.
    pub async fn send_and_confirm(
        &self,
        to: Address,
        value: U256,
        input: Bytes,
    ) -> Result<TxReceipt, ClientError> {
        let signed = self.sign_call(to, value, input).await?;
        let tx_hash = self.broadcast(&signed).await?;
        self.wait_receipt(tx_hash).await
    }
}
