//! Proof retrieval from the data-availability service.

use std::{sync::Arc, time::Duration};

use alloy_primitives::B256;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use paystream_attest::{ProofPayload, RequestDescriptor, VotingRound};

use crate::{error::ClientError, finality::PollOptions};

const PROOF_PATH: &str = "/api/v1/fdc/proof-by-request-round-raw";

/// Delay before the first query; the layer needs a moment after
/// finalization before proofs materialize.
const INITIAL_GRACE: Duration = Duration::from_secs(10);

/// Serves per-request responses and inclusion paths for finalized rounds.
#[async_trait]
pub trait ProofSource: Send + Sync {
    /// `None` means the proof is not materialized yet.
    async fn fetch_proof(
        &self,
        round: VotingRound,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<ProofPayload>, ClientError>;
}

/// HTTP client for the data-availability layer.
pub struct DaClient {
    client: Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ProofResponse {
    #[serde(default)]
    proof: Vec<String>,
    /// Absent while the proof is still being generated.
    #[serde(default)]
    response_hex: Option<String>,
}

impl DaClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self { client: Client::new(), base: base.into().trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl ProofSource for DaClient {
    async fn fetch_proof(
        &self,
        round: VotingRound,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<ProofPayload>, ClientError> {
        let url = format!("{}{}", self.base, PROOF_PATH);
        let body = json!({
            "votingRoundId": round.0,
            "requestBytes": format!("0x{}", hex::encode(&descriptor.0)),
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Http(format!(
                "data-availability service returned {}",
                response.status()
            )));
        }

        let parsed: ProofResponse =
            response.json().await.map_err(|e| ClientError::Json(e.to_string()))?;
        let Some(response_hex) = parsed.response_hex else { return Ok(None) };

        let response = hex::decode(response_hex.trim_start_matches("0x"))
            .map_err(|e| ClientError::Json(format!("malformed response bytes: {e}")))?;
        let merkle_path = parsed
            .proof
            .iter()
            .map(|h| h.parse::<B256>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ClientError::Json(format!("malformed sibling hash: {e}")))?;

        Ok(Some(ProofPayload { merkle_path, response: response.into() }))
    }
}

/// Polls the data-availability service until the proof exists.
///
/// Finality of the round does not imply the proof is served yet, so this
/// wait is genuinely separate from the finalization poll.
pub struct ProofRetriever {
    source: Arc<dyn ProofSource>,
    options: PollOptions,
}

impl ProofRetriever {
    pub fn new(source: Arc<dyn ProofSource>, options: PollOptions) -> Self {
        Self { source, options }
    }

    /// Poll until the payload is present, reporting elapsed seconds through
    /// `on_poll` after every query.
    pub async fn wait_proof<F>(
        &self,
        round: VotingRound,
        descriptor: &RequestDescriptor,
        mut cancel: watch::Receiver<bool>,
        mut on_poll: F,
    ) -> Result<ProofPayload, ClientError>
    where
        F: FnMut(u64) + Send,
    {
        let started = Instant::now();
        sleep(INITIAL_GRACE).await;

        loop {
            match self.source.fetch_proof(round, descriptor).await {
                Ok(Some(payload)) => return Ok(payload),
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        target: "paystream::da",
                        round = round.0,
                        error = %e,
                        "proof query failed"
                    );
                }
                Err(e) => return Err(e),
            }

            let waited = started.elapsed();
            on_poll(waited.as_secs());

            if let Some(max) = self.options.max_wait {
                if waited >= max {
                    return Err(ClientError::Timeout {
                        step: "proof retrieval",
                        waited_secs: waited.as_secs(),
                    });
                }
            }

            tokio::select! {
                _ = sleep(self.options.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(ClientError::Cancelled { step: "proof retrieval" });
                    }
                }
            }
        }
    }
}
