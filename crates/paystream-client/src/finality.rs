//! Finalization polling against the consensus finality registry.

use std::{sync::Arc, time::Duration};

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tokio::sync::{watch, OnceCell};
use tokio::time::{sleep, Instant};

use paystream_attest::abi::{fdcProtocolIdCall, isFinalizedCall};
use paystream_attest::VotingRound;

use crate::{
    error::ClientError,
    registry::{self, ContractRegistry},
    rpc::ChainRpc,
};

/// Read-only view of round finality.
#[async_trait]
pub trait FinalityOracle: Send + Sync {
    async fn is_finalized(&self, round: VotingRound) -> Result<bool, ClientError>;
}

/// Chain-backed finality view: the relay contract keyed by the attestation
/// protocol id.
pub struct ChainFinality {
    rpc: ChainRpc,
    registry: Arc<ContractRegistry>,
    protocol_id: OnceCell<U256>,
}

impl ChainFinality {
    pub fn new(rpc: ChainRpc, registry: Arc<ContractRegistry>) -> Self {
        Self { rpc, registry, protocol_id: OnceCell::new() }
    }

    async fn protocol_id(&self) -> Result<U256, ClientError> {
        self.protocol_id
            .get_or_try_init(|| async {
                let verification =
                    self.registry.resolve(registry::ATTESTATION_VERIFICATION).await?;
                let raw = self.rpc.call(verification, &fdcProtocolIdCall {}.abi_encode()).await?;
                fdcProtocolIdCall::abi_decode_returns(&raw)
                    .map_err(|e| ClientError::Rpc(format!("malformed protocol id: {e}")))
            })
            .await
            .copied()
    }
}

#[async_trait]
impl FinalityOracle for ChainFinality {
    async fn is_finalized(&self, round: VotingRound) -> Result<bool, ClientError> {
        let protocol_id = self.protocol_id().await?;
        let relay = self.registry.resolve(registry::FINALITY_RELAY).await?;
        let call = isFinalizedCall { protocolId: protocol_id, votingRoundId: U256::from(round.0) };
        let raw = self.rpc.call(relay, &call.abi_encode()).await?;
        isFinalizedCall::abi_decode_returns(&raw)
            .map_err(|e| ClientError::Rpc(format!("malformed finality flag: {e}")))
    }
}

/// Options for a bounded poll. `max_wait: None` keeps the historical
/// unbounded behavior; callers are expected to bound it.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self { interval: Duration::from_secs(10), max_wait: None }
    }
}

/// Polls the finality registry until a round is final.
pub struct FinalizationPoller {
    oracle: Arc<dyn FinalityOracle>,
    options: PollOptions,
}

impl FinalizationPoller {
    pub fn new(oracle: Arc<dyn FinalityOracle>, options: PollOptions) -> Self {
        Self { oracle, options }
    }

    /// Poll until the round is final, reporting elapsed seconds through
    /// `on_poll` after every query so the caller can apply its own
    /// abandonment policy. Returns the seconds waited.
    ///
    /// Transient oracle failures are absorbed; the next tick retries.
    pub async fn wait_finalized<F>(
        &self,
        round: VotingRound,
        mut cancel: watch::Receiver<bool>,
        mut on_poll: F,
    ) -> Result<u64, ClientError>
    where
        F: FnMut(u64) + Send,
    {
        let started = Instant::now();
        loop {
            match self.oracle.is_finalized(round).await {
                Ok(true) => return Ok(started.elapsed().as_secs()),
                Ok(false) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        target: "paystream::finality",
                        round = round.0,
                        error = %e,
                        "finality query failed"
                    );
                }
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            on_poll(waited.as_secs());

            if let Some(max) = self.options.max_wait {
                if waited >= max {
                    return Err(ClientError::Timeout {
                        step: "finalization",
                        waited_secs: waited.as_secs(),
                    });
                }
            }

            tokio::select! {
                _ = sleep(self.options.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ClientError::Cancelled { step: "finalization" });
                    }
                }
            }
        }
    }
}
