//! Tests for the pipeline controller, pollers, and relay.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolEvent, SolValue};
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use paystream_attest::abi::{PaymentClaimed, UnitCountTask, WireRequestBody, WireResponse, WireResponseBody};
use paystream_attest::{
    tag_to_bytes32, AttestationRequest, ClaimProof, ProofPayload, RequestDescriptor, VotingRound,
    WorkSource,
};

use super::controller::{ClaimPipeline, PipelineEvent, RunState};
use super::da::{ProofRetriever, ProofSource};
use super::error::ClientError;
use super::finality::{FinalityOracle, FinalizationPoller, PollOptions};
use super::payroll::{decode_claim_event, ClaimConfirmed, SettlementLedger, StreamInfo};
use super::relay::{
    claim_seq_from_logs, source_event_id, NullCursorStore, PayoutSink, RelayForwarder,
};
use super::rpc::{decode_revert_data, ChainRpc, LogEntry};
use super::scheduler::{RequestSubmitter, Submission};
use super::verifier::RequestPreparer;

// =============================================================================
// Fixtures
// =============================================================================

fn descriptor() -> RequestDescriptor {
    RequestDescriptor(vec![0xab; 64].into())
}

fn response_with_units(units: u64) -> WireResponse {
    WireResponse {
        attestationType: tag_to_bytes32("Web2Json"),
        sourceId: tag_to_bytes32("PublicWeb2"),
        votingRound: 1000,
        lowestUsedTimestamp: 1_735_689_600,
        requestBody: WireRequestBody::default(),
        responseBody: WireResponseBody {
            abiEncodedData: UnitCountTask { commitCount: U256::from(units) }.abi_encode().into(),
        },
    }
}

fn payload_with_units(units: u64) -> ProofPayload {
    ProofPayload {
        merkle_path: vec![B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)],
        response: response_with_units(units).abi_encode().into(),
    }
}

fn stream_info(last_claim_time: u64, created_at: u64) -> StreamInfo {
    StreamInfo {
        employer: Address::repeat_byte(0x01),
        worker: Address::repeat_byte(0x02),
        rate_per_interval: U256::from(10),
        claim_interval: 60,
        total_deposit: U256::from(1_000),
        total_claimed: U256::ZERO,
        last_claim_time,
        created_at,
        active: true,
    }
}

fn git_source() -> WorkSource {
    WorkSource::GitRepository { repo: "octocat/hello-world".to_string() }
}

fn sample_confirmed(stream_id: u64, log_index: u64) -> ClaimConfirmed {
    ClaimConfirmed {
        stream_id: U256::from(stream_id),
        worker: Address::repeat_byte(0x02),
        amount_native: U256::from(1_000),
        amount_usd: U256::from(500),
        oracle_price: U256::from(123),
        bonus_triggered: false,
        unit_count: 5,
        tx_hash: B256::repeat_byte(0x77),
        block_number: 99,
        log_index,
    }
}

fn log_at(block_number: u64, log_index: u64) -> LogEntry {
    LogEntry {
        address: Address::repeat_byte(0x42),
        topics: vec![],
        data: Default::default(),
        block_number,
        log_index,
        tx_hash: B256::repeat_byte(0x11),
    }
}

// =============================================================================
// Mock seams
// =============================================================================

#[derive(Default)]
struct RecordingPreparer {
    last_url: Mutex<Option<String>>,
}

#[async_trait]
impl RequestPreparer for RecordingPreparer {
    async fn prepare(
        &self,
        request: &AttestationRequest,
    ) -> Result<RequestDescriptor, ClientError> {
        *self.last_url.lock().await = Some(request.request_body.url.clone());
        Ok(descriptor())
    }
}

struct StaticSubmitter;

#[async_trait]
impl RequestSubmitter for StaticSubmitter {
    async fn submit(&self, _descriptor: &RequestDescriptor) -> Result<Submission, ClientError> {
        Ok(Submission {
            tx_hash: B256::repeat_byte(0x11),
            block_number: 42,
            round: VotingRound(1_000),
        })
    }
}

/// Finalizes after a fixed number of queries.
struct CountingOracle {
    final_after: u32,
    calls: AtomicU32,
}

impl CountingOracle {
    fn new(final_after: u32) -> Self {
        Self { final_after, calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl FinalityOracle for CountingOracle {
    async fn is_finalized(&self, _round: VotingRound) -> Result<bool, ClientError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n >= self.final_after)
    }
}

struct NeverFinalOracle {
    calls: AtomicU32,
}

#[async_trait]
impl FinalityOracle for NeverFinalOracle {
    async fn is_finalized(&self, _round: VotingRound) -> Result<bool, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

/// Serves the proof after a fixed number of not-ready polls.
struct ReadyProofSource {
    units: u64,
    not_ready_polls: u32,
    calls: AtomicU32,
}

impl ReadyProofSource {
    fn new(units: u64, not_ready_polls: u32) -> Self {
        Self { units, not_ready_polls, calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl ProofSource for ReadyProofSource {
    async fn fetch_proof(
        &self,
        _round: VotingRound,
        _descriptor: &RequestDescriptor,
    ) -> Result<Option<ProofPayload>, ClientError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.not_ready_polls {
            return Ok(None);
        }
        Ok(Some(payload_with_units(self.units)))
    }
}

struct MockLedger {
    stream: StreamInfo,
    revert_with: Option<String>,
    claims: AtomicU32,
}

impl MockLedger {
    fn new(stream: StreamInfo) -> Self {
        Self { stream, revert_with: None, claims: AtomicU32::new(0) }
    }

    fn reverting(stream: StreamInfo, reason: &str) -> Self {
        Self { stream, revert_with: Some(reason.to_string()), claims: AtomicU32::new(0) }
    }
}

#[async_trait]
impl SettlementLedger for MockLedger {
    async fn stream(&self, _stream_id: u64) -> Result<StreamInfo, ClientError> {
        Ok(self.stream.clone())
    }

    async fn claim(
        &self,
        stream_id: u64,
        proof: &ClaimProof,
    ) -> Result<ClaimConfirmed, ClientError> {
        if let Some(reason) = &self.revert_with {
            return Err(ClientError::Reverted(reason.clone()));
        }
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(ClaimConfirmed {
            stream_id: U256::from(stream_id),
            worker: self.stream.worker,
            amount_native: U256::from(100),
            amount_usd: U256::from(50),
            oracle_price: U256::from(123),
            bonus_triggered: false,
            unit_count: proof.unit_count().unwrap_or(0),
            tx_hash: B256::repeat_byte(0x22),
            block_number: 50,
            log_index: 0,
        })
    }
}

fn build_pipeline(
    preparer: Arc<RecordingPreparer>,
    oracle: Arc<dyn FinalityOracle>,
    proofs: Arc<dyn ProofSource>,
    ledger: Arc<MockLedger>,
    max_wait: Option<Duration>,
) -> ClaimPipeline {
    let poll = PollOptions { interval: Duration::from_secs(10), max_wait };
    ClaimPipeline::builder()
        .preparer(preparer)
        .submitter(Arc::new(StaticSubmitter))
        .oracle(oracle)
        .proof_source(proofs)
        .ledger(ledger)
        .finality_poll(poll)
        .proof_poll(poll)
        .build()
        .start()
}

// =============================================================================
// Pipeline controller
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_claim_pays_for_full_history() {
    let preparer = Arc::new(RecordingPreparer::default());
    let ledger = Arc::new(MockLedger::new(stream_info(500, 500)));
    let pipeline = build_pipeline(
        preparer.clone(),
        Arc::new(CountingOracle::new(3)),
        Arc::new(ReadyProofSource::new(5, 2)),
        ledger.clone(),
        Some(Duration::from_secs(600)),
    );

    let confirmed = pipeline.run(0, &git_source()).await.unwrap();
    assert_eq!(confirmed.unit_count, 5);
    assert_eq!(ledger.claims.load(Ordering::SeqCst), 1);

    // First-ever claim: the listing is unbounded.
    let url = preparer.last_url.lock().await.clone().unwrap();
    assert!(!url.contains("since="), "unexpected cursor in {url}");

    // A finished run returns to Idle.
    assert_eq!(pipeline.state(0).await, RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_second_claim_counts_only_new_units() {
    let preparer = Arc::new(RecordingPreparer::default());
    // lastClaimTime after createdAt: a prior claim advanced the cursor.
    let ledger = Arc::new(MockLedger::new(stream_info(1_735_689_600, 500)));
    let pipeline = build_pipeline(
        preparer.clone(),
        Arc::new(CountingOracle::new(1)),
        Arc::new(ReadyProofSource::new(2, 0)),
        ledger,
        Some(Duration::from_secs(600)),
    );

    let confirmed = pipeline.run(1, &git_source()).await.unwrap();
    assert_eq!(confirmed.unit_count, 2);

    let url = preparer.last_url.lock().await.clone().unwrap();
    assert!(url.contains("since=2025-01-01T00:00:00Z"), "missing cursor in {url}");
}

#[tokio::test(start_paused = true)]
async fn test_transitions_run_in_order() {
    let pipeline = build_pipeline(
        Arc::new(RecordingPreparer::default()),
        Arc::new(CountingOracle::new(2)),
        Arc::new(ReadyProofSource::new(1, 1)),
        Arc::new(MockLedger::new(stream_info(500, 500))),
        Some(Duration::from_secs(600)),
    );

    let mut events = pipeline.subscribe();
    pipeline.run(0, &git_source()).await.unwrap();

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::StateChanged { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            RunState::Preparing,
            RunState::Submitting,
            RunState::Finalizing,
            RunState::Retrieving,
            RunState::Claiming,
            RunState::Done,
            RunState::Idle,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_claim_revert_moves_run_to_error() {
    let ledger =
        Arc::new(MockLedger::reverting(stream_info(500, 500), "insufficient escrow balance"));
    let pipeline = build_pipeline(
        Arc::new(RecordingPreparer::default()),
        Arc::new(CountingOracle::new(1)),
        Arc::new(ReadyProofSource::new(5, 0)),
        ledger.clone(),
        Some(Duration::from_secs(600)),
    );

    let err = pipeline.run(3, &git_source()).await.unwrap_err();
    assert!(
        matches!(err, ClientError::Reverted(ref reason) if reason == "insufficient escrow balance")
    );
    assert_eq!(ledger.claims.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state(3).await, RunState::Error);

    // Error leaves only through an explicit reset.
    let err = pipeline.run(3, &git_source()).await.unwrap_err();
    assert!(matches!(err, ClientError::ResetRequired(3)));
    pipeline.reset(3).await.unwrap();
    assert_eq!(pipeline.state(3).await, RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_per_stream() {
    let pipeline = Arc::new(build_pipeline(
        Arc::new(RecordingPreparer::default()),
        Arc::new(NeverFinalOracle { calls: AtomicU32::new(0) }),
        Arc::new(ReadyProofSource::new(5, 0)),
        Arc::new(MockLedger::new(stream_info(500, 500))),
        None,
    ));

    let background = pipeline.clone();
    let handle = tokio::spawn(async move { background.run(9, &git_source()).await });

    // Let the first run reach its finalization wait.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let err = pipeline.run(9, &git_source()).await.unwrap_err();
    assert!(matches!(err, ClientError::RunInFlight(9)));

    // Abandoning stops the poll at its next suspension point.
    pipeline.abandon(9).await;
    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Cancelled { .. }));
    assert_eq!(pipeline.state(9).await, RunState::Error);
}

// =============================================================================
// Finalization poller
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_finalization_never_true_requires_caller_bound() {
    // The registry never finalizes: the poller keeps its fixed cadence and
    // only a caller-supplied bound ends the wait.
    let oracle = Arc::new(NeverFinalOracle { calls: AtomicU32::new(0) });
    let poller = FinalizationPoller::new(
        oracle.clone(),
        PollOptions { interval: Duration::from_secs(10), max_wait: Some(Duration::from_secs(100)) },
    );

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut reports = Vec::new();
    let err = poller
        .wait_finalized(VotingRound(1), cancel_rx, |waited| reports.push(waited))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout { step: "finalization", .. }));
    // One query per tick: t = 0, 10, ..., 100.
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 11);
    assert!(!reports.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poller_reports_only_when_registry_does() {
    let oracle = Arc::new(CountingOracle::new(4));
    let poller = FinalizationPoller::new(
        oracle.clone(),
        PollOptions { interval: Duration::from_secs(10), max_wait: None },
    );

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let waited = poller.wait_finalized(VotingRound(1), cancel_rx, |_| {}).await.unwrap();

    // Three not-final answers at 10s apart before the fourth succeeds.
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
    assert_eq!(waited, 30);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_unbounded_poll() {
    let oracle = Arc::new(NeverFinalOracle { calls: AtomicU32::new(0) });
    let poller = FinalizationPoller::new(oracle, PollOptions::default());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handle =
        tokio::spawn(async move { poller.wait_finalized(VotingRound(1), cancel_rx, |_| {}).await });

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel_tx.send(true).unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Cancelled { step: "finalization" }));
}

// =============================================================================
// Proof retriever
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_proof_retrieval_waits_for_materialization() {
    let source = Arc::new(ReadyProofSource::new(7, 3));
    let retriever = ProofRetriever::new(
        source.clone(),
        PollOptions { interval: Duration::from_secs(10), max_wait: None },
    );

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let payload =
        retriever.wait_proof(VotingRound(5), &descriptor(), cancel_rx, |_| {}).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    assert_eq!(ClaimProof::assemble(&payload).unwrap().unit_count().unwrap(), 7);

    // Once the proof exists, the same query yields the same payload.
    let (_cancel_tx2, cancel_rx2) = watch::channel(false);
    let again =
        retriever.wait_proof(VotingRound(5), &descriptor(), cancel_rx2, |_| {}).await.unwrap();
    assert_eq!(again, payload);
}

// =============================================================================
// Claim event decoding and revert data
// =============================================================================

#[test]
fn test_decode_claim_event_log() {
    let worker = Address::repeat_byte(0x33);
    let data = (U256::from(1_000u64), U256::from(500u64), U256::from(123_456u64), true, U256::from(5u64))
        .abi_encode();
    let log = LogEntry {
        address: Address::repeat_byte(0x42),
        topics: vec![
            PaymentClaimed::SIGNATURE_HASH,
            B256::from(U256::from(7u64)),
            B256::left_padding_from(worker.as_slice()),
        ],
        data: data.into(),
        block_number: 99,
        log_index: 1,
        tx_hash: B256::repeat_byte(0x77),
    };

    let confirmed = decode_claim_event(&log).unwrap();
    assert_eq!(confirmed.stream_id, U256::from(7u64));
    assert_eq!(confirmed.worker, worker);
    assert_eq!(confirmed.amount_native, U256::from(1_000u64));
    assert_eq!(confirmed.amount_usd, U256::from(500u64));
    assert!(confirmed.bonus_triggered);
    assert_eq!(confirmed.unit_count, 5);
    assert_eq!(confirmed.block_number, 99);
}

#[test]
fn test_decode_standard_revert_data() {
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
    data.extend("insufficient escrow balance".to_string().abi_encode());
    let hex_data = format!("0x{}", hex::encode(data));
    assert_eq!(decode_revert_data(&hex_data).as_deref(), Some("insufficient escrow balance"));

    // Anything but Error(string) is left for the caller's fallback.
    assert_eq!(decode_revert_data("0xdeadbeef"), None);
}

// =============================================================================
// Relay forwarder
// =============================================================================

#[derive(Default)]
struct MemorySink {
    written: Mutex<HashSet<B256>>,
    writes: AtomicU32,
}

#[async_trait]
impl PayoutSink for MemorySink {
    async fn record(
        &self,
        event_id: B256,
        _confirmed: &ClaimConfirmed,
    ) -> Result<Option<B256>, ClientError> {
        let mut written = self.written.lock().await;
        if !written.insert(event_id) {
            return Ok(None);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(B256::repeat_byte(0x99)))
    }
}

fn test_forwarder(sink: Arc<MemorySink>) -> RelayForwarder {
    RelayForwarder::builder()
        .source(ChainRpc::new("http://localhost:8545"))
        .source_ws_url("http://localhost:8545".to_string())
        .payroll_address(Address::repeat_byte(0x42))
        .sink(sink)
        .store(Arc::new(NullCursorStore))
        .build()
        .start()
}

#[test]
fn test_source_event_id_is_stable() {
    let id = source_event_id(U256::from(7), 3);
    assert_eq!(id, source_event_id(U256::from(7), 3));
    assert_ne!(id, source_event_id(U256::from(7), 4));
    assert_ne!(id, source_event_id(U256::from(8), 3));
}

#[test]
fn test_claim_seq_orders_by_block_then_index() {
    let history = vec![log_at(10, 0), log_at(10, 2), log_at(12, 1)];
    assert_eq!(claim_seq_from_logs(&history, 10, 0), 0);
    assert_eq!(claim_seq_from_logs(&history, 10, 2), 1);
    assert_eq!(claim_seq_from_logs(&history, 12, 1), 2);
    assert_eq!(claim_seq_from_logs(&history, 13, 0), 3);
}

#[tokio::test]
async fn test_duplicate_event_writes_once() {
    let sink = Arc::new(MemorySink::default());
    let forwarder = test_forwarder(sink.clone());

    // The same source event delivered twice produces one effective receipt.
    let confirmed = sample_confirmed(7, 0);
    forwarder.forward_confirmed(&confirmed, 3).await;
    forwarder.forward_confirmed(&confirmed, 3).await;

    assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_claims_write_distinct_receipts() {
    let sink = Arc::new(MemorySink::default());
    let forwarder = test_forwarder(sink.clone());

    forwarder.forward_confirmed(&sample_confirmed(7, 0), 0).await;
    forwarder.forward_confirmed(&sample_confirmed(7, 1), 1).await;

    assert_eq!(sink.writes.load(Ordering::SeqCst), 2);
}
