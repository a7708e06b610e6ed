//! Pipeline controller: one observable, cancellable run per stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{B256, U256};
use bon::Builder;
use futures::stream::Stream;
use tokio::sync::{broadcast, watch, Mutex};

use paystream_attest::{AttestationRequest, ClaimProof, WorkSource};

use crate::{
    da::{ProofRetriever, ProofSource},
    error::ClientError,
    finality::{FinalityOracle, FinalizationPoller, PollOptions},
    payroll::{ClaimConfirmed, SettlementLedger},
    scheduler::RequestSubmitter,
    verifier::RequestPreparer,
};

/// Pipeline run states. `Idle` is the only re-entrant state; `Error` is
/// left only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Preparing,
    Submitting,
    Finalizing,
    Retrieving,
    Claiming,
    Done,
    Error,
}

/// Progress events emitted on every transition, with whatever verifiable
/// artifact the run has produced so far.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged { stream_id: u64, state: RunState },
    Progress { stream_id: u64, message: String },
    RequestPrepared { stream_id: u64, descriptor_hash: B256, unbounded_history: bool },
    Submitted { stream_id: u64, tx_hash: B256, round: u64 },
    RoundFinalized { stream_id: u64, round: u64, waited_secs: u64 },
    ProofRetrieved { stream_id: u64, round: u64, proof_depth: usize, unit_count: u64 },
    Claimed { stream_id: u64, tx_hash: B256, amount_native: U256, bonus_triggered: bool, unit_count: u64 },
    Failed { stream_id: u64, state: RunState, error: String },
}

struct StreamRun {
    state: RunState,
    generation: u64,
    cancel: watch::Sender<bool>,
}

/// Injected components of one claim pipeline.
#[derive(Builder)]
pub struct ClaimPipelineConfig {
    preparer: Arc<dyn RequestPreparer>,
    submitter: Arc<dyn RequestSubmitter>,
    oracle: Arc<dyn FinalityOracle>,
    proof_source: Arc<dyn ProofSource>,
    ledger: Arc<dyn SettlementLedger>,

    /// Finalization polling cadence and bound.
    #[builder(default)]
    finality_poll: PollOptions,

    /// Proof-retrieval polling cadence and bound.
    #[builder(default)]
    proof_poll: PollOptions,
}

impl ClaimPipelineConfig {
    /// Build the pipeline from this configuration.
    pub fn start(self) -> ClaimPipeline {
        ClaimPipeline::new(self)
    }
}

/// Drives claim runs for payment streams.
///
/// Pipelines for different streams are independent; within one stream, the
/// controller enforces single flight: a second run is rejected until the
/// first returns to `Idle`.
pub struct ClaimPipeline {
    preparer: Arc<dyn RequestPreparer>,
    submitter: Arc<dyn RequestSubmitter>,
    poller: FinalizationPoller,
    retriever: ProofRetriever,
    ledger: Arc<dyn SettlementLedger>,
    runs: Mutex<HashMap<u64, StreamRun>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<PipelineEvent>,
}

impl ClaimPipeline {
    pub fn builder() -> ClaimPipelineConfigBuilder {
        ClaimPipelineConfig::builder()
    }

    pub fn new(config: ClaimPipelineConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            preparer: config.preparer,
            submitter: config.submitter,
            poller: FinalizationPoller::new(config.oracle, config.finality_poll),
            retriever: ProofRetriever::new(config.proof_source, config.proof_poll),
            ledger: config.ledger,
            runs: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            events,
        }
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Progress events as a stream. Lagged receivers skip ahead rather
    /// than erroring out.
    pub fn stream_events(&self) -> Pin<Box<dyn Stream<Item = PipelineEvent> + Send>> {
        let mut rx = self.events.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        })
    }

    /// Current state for a stream.
    pub async fn state(&self, stream_id: u64) -> RunState {
        self.runs.lock().await.get(&stream_id).map(|r| r.state).unwrap_or(RunState::Idle)
    }

    /// Clear a failed run so a new one may start. Only `Error` resets.
    pub async fn reset(&self, stream_id: u64) -> Result<(), ClientError> {
        let mut runs = self.runs.lock().await;
        match runs.get(&stream_id).map(|r| r.state) {
            Some(RunState::Error) => {
                runs.remove(&stream_id);
                drop(runs);
                self.emit_state(stream_id, RunState::Idle);
                Ok(())
            }
            Some(_) => Err(ClientError::RunInFlight(stream_id)),
            None => Ok(()),
        }
    }

    /// Ask an in-flight run to stop at its next suspension point. In-flight
    /// network calls are not forcibly aborted; a late completion is
    /// discarded by the generation guard.
    pub async fn abandon(&self, stream_id: u64) {
        if let Some(run) = self.runs.lock().await.get(&stream_id) {
            let _ = run.cancel.send(true);
        }
    }

    /// Execute one full claim run for a stream.
    pub async fn run(
        &self,
        stream_id: u64,
        source: &WorkSource,
    ) -> Result<ClaimConfirmed, ClientError> {
        let (generation, cancel) = self.begin(stream_id).await?;
        let result = self.drive(stream_id, generation, source, cancel).await;
        self.finish(stream_id, generation, &result).await;
        result
    }

    async fn begin(&self, stream_id: u64) -> Result<(u64, watch::Receiver<bool>), ClientError> {
        let mut runs = self.runs.lock().await;
        match runs.get(&stream_id).map(|r| r.state) {
            None => {}
            Some(RunState::Error) => return Err(ClientError::ResetRequired(stream_id)),
            Some(_) => return Err(ClientError::RunInFlight(stream_id)),
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        runs.insert(stream_id, StreamRun { state: RunState::Preparing, generation, cancel: cancel_tx });
        drop(runs);

        self.emit_state(stream_id, RunState::Preparing);
        Ok((generation, cancel_rx))
    }

    async fn drive(
        &self,
        stream_id: u64,
        generation: u64,
        source: &WorkSource,
        cancel: watch::Receiver<bool>,
    ) -> Result<ClaimConfirmed, ClientError> {
        // Preparing: canonical request from the stream's claim cursor.
        let stream = self.ledger.stream(stream_id).await?;
        if !stream.active {
            return Err(ClientError::Config(format!("stream {stream_id} is not active")));
        }
        let since = stream.since_cursor();
        let request = AttestationRequest::build(source, since);
        let descriptor = self.preparer.prepare(&request).await?;
        let _ = self.events.send(PipelineEvent::RequestPrepared {
            stream_id,
            descriptor_hash: descriptor.hash(),
            unbounded_history: since.is_none(),
        });

        // Submitting: pay the fee, derive the answering round.
        self.ensure_live(&cancel)?;
        self.transition(stream_id, generation, RunState::Submitting).await?;
        let submission = self.submitter.submit(&descriptor).await?;
        let _ = self.events.send(PipelineEvent::Submitted {
            stream_id,
            tx_hash: submission.tx_hash,
            round: submission.round.0,
        });

        // Finalizing: wait for the answering round to be final.
        self.ensure_live(&cancel)?;
        self.transition(stream_id, generation, RunState::Finalizing).await?;
        let round = submission.round;
        let progress = self.events.clone();
        let waited_secs = self
            .poller
            .wait_finalized(round, cancel.clone(), move |waited_secs| {
                let _ = progress.send(PipelineEvent::Progress {
                    stream_id,
                    message: format!(
                        "waiting for round {} finalization ({waited_secs}s elapsed)",
                        round.0
                    ),
                });
            })
            .await?;
        let _ =
            self.events.send(PipelineEvent::RoundFinalized { stream_id, round: round.0, waited_secs });

        // Retrieving: response bytes plus inclusion path, then assembly.
        self.transition(stream_id, generation, RunState::Retrieving).await?;
        let progress = self.events.clone();
        let payload = self
            .retriever
            .wait_proof(round, &descriptor, cancel.clone(), move |waited_secs| {
                let _ = progress.send(PipelineEvent::Progress {
                    stream_id,
                    message: format!("waiting for proof ({waited_secs}s elapsed)"),
                });
            })
            .await?;
        let proof = ClaimProof::assemble(&payload)?;
        let unit_count = proof.unit_count()?;
        let _ = self.events.send(PipelineEvent::ProofRetrieved {
            stream_id,
            round: round.0,
            proof_depth: proof.depth(),
            unit_count,
        });

        // Claiming: the only step that moves funds.
        self.ensure_live(&cancel)?;
        self.transition(stream_id, generation, RunState::Claiming).await?;
        let confirmed = self.ledger.claim(stream_id, &proof).await?;
        let _ = self.events.send(PipelineEvent::Claimed {
            stream_id,
            tx_hash: confirmed.tx_hash,
            amount_native: confirmed.amount_native,
            bonus_triggered: confirmed.bonus_triggered,
            unit_count: confirmed.unit_count,
        });

        Ok(confirmed)
    }

    async fn finish(
        &self,
        stream_id: u64,
        generation: u64,
        result: &Result<ClaimConfirmed, ClientError>,
    ) {
        match result {
            Ok(_) => {
                // Done, then back to Idle so the stream can run again.
                if self.transition(stream_id, generation, RunState::Done).await.is_ok() {
                    let mut runs = self.runs.lock().await;
                    if runs.get(&stream_id).map(|r| r.generation) == Some(generation) {
                        runs.remove(&stream_id);
                    }
                    drop(runs);
                    self.emit_state(stream_id, RunState::Idle);
                }
            }
            Err(e) => {
                let mut runs = self.runs.lock().await;
                let Some(run) = runs.get_mut(&stream_id) else { return };
                if run.generation != generation {
                    return;
                }
                let failed_at = run.state;
                run.state = RunState::Error;
                drop(runs);

                let _ = self.events.send(PipelineEvent::Failed {
                    stream_id,
                    state: failed_at,
                    error: e.to_string(),
                });
                self.emit_state(stream_id, RunState::Error);
            }
        }
    }

    /// Move the run forward. A stale run (superseded generation, or a table
    /// entry that no longer exists) must never touch a newer run's state.
    async fn transition(
        &self,
        stream_id: u64,
        generation: u64,
        state: RunState,
    ) -> Result<(), ClientError> {
        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(&stream_id) else {
            return Err(ClientError::Cancelled { step: "superseded" });
        };
        if run.generation != generation {
            return Err(ClientError::Cancelled { step: "superseded" });
        }
        run.state = state;
        drop(runs);

        self.emit_state(stream_id, state);
        Ok(())
    }

    fn ensure_live(&self, cancel: &watch::Receiver<bool>) -> Result<(), ClientError> {
        if *cancel.borrow() {
            return Err(ClientError::Cancelled { step: "pipeline" });
        }
        Ok(())
    }

    fn emit_state(&self, stream_id: u64, state: RunState) {
        tracing::info!(
            target: "paystream::pipeline",
            stream = stream_id,
            state = ?state,
            "state change"
        );
        let _ = self.events.send(PipelineEvent::StateChanged { stream_id, state });
    }
}
