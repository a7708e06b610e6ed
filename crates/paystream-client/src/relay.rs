//! One-way settlement-event relay onto the destination ledger.
//!
//! The forwarder holds no persistent memory of what it has sent: the
//! destination ledger keys receipts on `source_event_id` and ignores
//! duplicates, so startup replay over a look-back window plus at-least-once
//! delivery is sufficient. Destination writes are economically free, which
//! is the trade that makes this design sound.

use std::pin::Pin;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use bon::Builder;
use futures::{stream::Stream, SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use paystream_attest::abi::{recordPayoutCall, PaymentClaimed};
use paystream_types::RelayCursor;

use crate::{
    error::ClientError,
    payroll::{decode_claim_event, ClaimConfirmed},
    rpc::{ChainRpc, LogEntry},
    wallet::TxSender,
};

/// Persistence seam for the replay cursor.
pub trait CursorStore: Send + Sync {
    fn load_cursor(&self) -> Result<Option<RelayCursor>, ClientError>;
    fn save_cursor(&self, cursor: &RelayCursor) -> Result<(), ClientError>;
}

/// Ephemeral cursor for runs that always replay from the deploy block.
pub struct NullCursorStore;

impl CursorStore for NullCursorStore {
    fn load_cursor(&self) -> Result<Option<RelayCursor>, ClientError> {
        Ok(None)
    }

    fn save_cursor(&self, _cursor: &RelayCursor) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Destination write seam. `Ok(None)` means the destination already holds
/// this receipt (or refused the write), which is a skip, not a failure.
#[async_trait]
pub trait PayoutSink: Send + Sync {
    async fn record(
        &self,
        event_id: B256,
        confirmed: &ClaimConfirmed,
    ) -> Result<Option<B256>, ClientError>;
}

/// Chain-backed payout sink writing through the restricted credential.
pub struct ChainPayoutSink {
    destination: Arc<TxSender>,
    payout_address: Address,
}

impl ChainPayoutSink {
    pub fn new(destination: Arc<TxSender>, payout_address: Address) -> Self {
        Self { destination, payout_address }
    }
}

#[async_trait]
impl PayoutSink for ChainPayoutSink {
    async fn record(
        &self,
        event_id: B256,
        confirmed: &ClaimConfirmed,
    ) -> Result<Option<B256>, ClientError> {
        let call = recordPayoutCall {
            sourceEventId: event_id,
            worker: confirmed.worker,
            sourceStreamId: confirmed.stream_id,
            amountNative: confirmed.amount_native,
            amountUsd: confirmed.amount_usd,
            bonusTriggered: confirmed.bonus_triggered,
            unitCount: U256::from(confirmed.unit_count),
        };

        match self
            .destination
            .send_and_confirm(self.payout_address, U256::ZERO, call.abi_encode().into())
            .await
        {
            Ok(receipt) if receipt.status_ok => Ok(Some(receipt.tx_hash)),
            // Included but reverted: the destination refused the write.
            Ok(_) => Ok(None),
            // Refused at gas estimation: duplicate or otherwise rejected.
            Err(ClientError::SubmissionRejected(reason)) => {
                tracing::debug!(target: "paystream::relay", reason = %reason, "destination refused write");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Events emitted by the forwarder for observability.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    ReplayStarted { from_block: u64, to_block: u64 },
    PayoutForwarded { source_event_id: B256, stream_id: U256, tx_hash: B256 },
    DuplicateSkipped { source_event_id: B256 },
    WriteFailed { source_event_id: B256, error: String },
    CursorAdvanced { block: u64 },
}

/// Identity of a claim event on the destination ledger: stream id plus the
/// claim's position in that stream's event history. Wall-clock never enters
/// the key, so a redelivered event reproduces the same id.
pub fn source_event_id(stream_id: U256, claim_seq: u64) -> B256 {
    keccak256((stream_id, U256::from(claim_seq)).abi_encode())
}

/// 0-based position of the claim at `(block_number, log_index)` within an
/// ordered claim-event history.
pub fn claim_seq_from_logs(history: &[LogEntry], block_number: u64, log_index: u64) -> u64 {
    history.iter().filter(|l| (l.block_number, l.log_index) < (block_number, log_index)).count()
        as u64
}

/// Wiring for one relay forwarder.
#[derive(Builder)]
pub struct RelayForwarderConfig {
    /// Source-chain JSON-RPC endpoint (log queries).
    source: ChainRpc,

    /// Source-chain WebSocket endpoint for the push subscription.
    /// `https://` and `http://` schemes are rewritten to WebSocket.
    source_ws_url: String,

    /// Settlement contract emitting claim-confirmed events.
    payroll_address: Address,

    sink: Arc<dyn PayoutSink>,
    store: Arc<dyn CursorStore>,

    /// How far behind the saved cursor the startup replay reaches.
    #[builder(default = 1_000)]
    lookback_blocks: u64,

    /// First block that can contain claim events.
    #[builder(default)]
    deploy_block: u64,
}

impl RelayForwarderConfig {
    pub fn start(self) -> RelayForwarder {
        RelayForwarder::new(self)
    }
}

/// Mirrors claim-confirmed events into destination receipts.
pub struct RelayForwarder {
    source: ChainRpc,
    source_ws_url: String,
    payroll_address: Address,
    sink: Arc<dyn PayoutSink>,
    store: Arc<dyn CursorStore>,
    lookback_blocks: u64,
    deploy_block: u64,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayForwarder {
    pub fn builder() -> RelayForwarderConfigBuilder {
        RelayForwarderConfig::builder()
    }

    pub fn new(config: RelayForwarderConfig) -> Self {
        let ws_url =
            config.source_ws_url.replace("https://", "wss://").replace("http://", "ws://");
        let (events, _) = broadcast::channel(256);
        Self {
            source: config.source,
            source_ws_url: ws_url,
            payroll_address: config.payroll_address,
            sink: config.sink,
            store: config.store,
            lookback_blocks: config.lookback_blocks,
            deploy_block: config.deploy_block,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Replay the historical window, then follow the live subscription.
    /// Runs until the subscription ends.
    pub async fn run(&self) -> Result<(), ClientError> {
        let head = self.source.block_number().await?;
        let start = match self.store.load_cursor()? {
            Some(cursor) => {
                cursor.last_block.saturating_sub(self.lookback_blocks).max(self.deploy_block)
            }
            None => self.deploy_block,
        };
        let _ = self.events.send(RelayEvent::ReplayStarted { from_block: start, to_block: head });
        tracing::info!(
            target: "paystream::relay",
            from = start,
            to = head,
            "replaying claim events"
        );

        // Every write is idempotent at the destination, so overlap between
        // the replay window and the live subscription is safe.
        let history = self
            .source
            .logs(self.payroll_address, vec![Some(PaymentClaimed::SIGNATURE_HASH)], start, head)
            .await?;
        for log in &history {
            self.forward(log).await;
            self.advance_cursor(log.block_number);
        }

        let mut live = self.subscribe_logs().await?;
        while let Some(log) = live.next().await {
            let block_number = log.block_number;
            self.forward(&log).await;
            self.advance_cursor(block_number);
        }

        Err(ClientError::Rpc("event subscription ended".to_string()))
    }

    /// Mirror one claim event. Failures are logged and left to the next
    /// replay; no in-process retry loop.
    pub async fn forward(&self, log: &LogEntry) {
        let confirmed = match decode_claim_event(log) {
            Ok(confirmed) => confirmed,
            Err(e) => {
                tracing::warn!(target: "paystream::relay", error = %e, "skipping undecodable log");
                return;
            }
        };

        let seq = match self.claim_sequence(&confirmed).await {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(target: "paystream::relay", error = %e, "claim sequence lookup failed");
                return;
            }
        };

        self.forward_confirmed(&confirmed, seq).await;
    }

    /// Write one receipt with a known claim sequence.
    pub async fn forward_confirmed(&self, confirmed: &ClaimConfirmed, claim_seq: u64) {
        let event_id = source_event_id(confirmed.stream_id, claim_seq);
        match self.sink.record(event_id, confirmed).await {
            Ok(Some(tx_hash)) => {
                tracing::info!(
                    target: "paystream::relay",
                    event = %event_id,
                    stream = %confirmed.stream_id,
                    tx = %tx_hash,
                    "payout forwarded"
                );
                let _ = self.events.send(RelayEvent::PayoutForwarded {
                    source_event_id: event_id,
                    stream_id: confirmed.stream_id,
                    tx_hash,
                });
            }
            Ok(None) => {
                let _ =
                    self.events.send(RelayEvent::DuplicateSkipped { source_event_id: event_id });
            }
            Err(e) => {
                tracing::warn!(
                    target: "paystream::relay",
                    event = %event_id,
                    error = %e,
                    "payout write failed; replay will retry"
                );
                let _ = self.events.send(RelayEvent::WriteFailed {
                    source_event_id: event_id,
                    error: e.to_string(),
                });
            }
        }
    }

    /// 0-based position of this claim among the stream's claim events,
    /// derived from log order on the source ledger.
    async fn claim_sequence(&self, confirmed: &ClaimConfirmed) -> Result<u64, ClientError> {
        let history = self
            .source
            .logs(
                self.payroll_address,
                vec![
                    Some(PaymentClaimed::SIGNATURE_HASH),
                    Some(B256::from(confirmed.stream_id)),
                ],
                self.deploy_block,
                confirmed.block_number,
            )
            .await?;
        Ok(claim_seq_from_logs(&history, confirmed.block_number, confirmed.log_index))
    }

    fn advance_cursor(&self, block: u64) {
        if let Err(e) = self.store.save_cursor(&RelayCursor::at(block)) {
            tracing::warn!(target: "paystream::relay", error = %e, "cursor save failed");
            return;
        }
        let _ = self.events.send(RelayEvent::CursorAdvanced { block });
    }

    async fn subscribe_logs(
        &self,
    ) -> Result<Pin<Box<dyn Stream<Item = LogEntry> + Send>>, ClientError> {
        let (tx, rx) = mpsc::channel(256);
        let ws_url = self.source_ws_url.clone();
        let address = self.payroll_address;

        tokio::spawn(async move {
            if let Err(e) = run_subscription(ws_url, address, tx).await {
                tracing::error!(target: "paystream::relay", error = %e, "event subscription failed");
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}

async fn run_subscription(
    ws_url: String,
    address: Address,
    tx: mpsc::Sender<LogEntry>,
) -> Result<(), ClientError> {
    let (ws_stream, _) =
        connect_async(&ws_url).await.map_err(|e| ClientError::Http(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe_msg = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["logs", {
            "address": format!("{address:?}"),
            "topics": [format!("{:?}", PaymentClaimed::SIGNATURE_HASH)],
        }]
    });

    write
        .send(Message::Text(subscribe_msg.to_string().into()))
        .await
        .map_err(|e| ClientError::Http(e.to_string()))?;

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(target: "paystream::relay", error = %e, "websocket error");
                break;
            }
        };

        let parsed: serde_json::Value = match serde_json::from_str(&msg) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some(result) = parsed.get("params").and_then(|p| p.get("result")) else { continue };
        if let Some(log) = parse_subscription_log(result) {
            if tx.send(log).await.is_err() {
                break;
            }
        }
    }

    Ok(())
}

fn parse_subscription_log(v: &serde_json::Value) -> Option<LogEntry> {
    let address = v.get("address")?.as_str()?.parse::<Address>().ok()?;
    let topics = v
        .get("topics")?
        .as_array()?
        .iter()
        .filter_map(|t| t.as_str()?.parse::<B256>().ok())
        .collect();
    let data = v
        .get("data")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
        .unwrap_or_default();
    let block_number = v
        .get("blockNumber")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0);
    let log_index = v
        .get("logIndex")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0);
    let tx_hash = v
        .get("transactionHash")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse::<B256>().ok())
        .unwrap_or_default();

    Some(LogEntry { address, topics, data: data.into(), block_number, log_index, tx_hash })
}
