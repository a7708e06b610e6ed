//! Raw JSON-RPC plumbing shared by the pipeline and the relay.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::ClientError;

/// Thin JSON-RPC client. One instance per chain endpoint.
#[derive(Debug, Clone)]
pub struct ChainRpc {
    client: Client,
    url: String,
}

/// Minimal transaction receipt view.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub status_ok: bool,
    pub logs: Vec<LogEntry>,
}

/// A raw event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl ChainRpc {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let req = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });

        let resp = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;

        let body: Value = resp.json().await.map_err(|e| ClientError::Json(e.to_string()))?;

        if let Some(err) = body.get("error") {
            return Err(ClientError::Rpc(err.to_string()));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ClientError::Rpc(format!("no result for {method}")))
    }

    pub async fn chain_id(&self) -> Result<u64, ClientError> {
        let v = self.request("eth_chainId", json!([])).await?;
        parse_u64(&v).ok_or_else(|| ClientError::Rpc("malformed chain id".to_string()))
    }

    pub async fn block_number(&self) -> Result<u64, ClientError> {
        let v = self.request("eth_blockNumber", json!([])).await?;
        parse_u64(&v).ok_or_else(|| ClientError::Rpc("malformed block number".to_string()))
    }

    /// Timestamp of a block by number.
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, ClientError> {
        let v = self
            .request("eth_getBlockByNumber", json!([format!("0x{number:x}"), false]))
            .await?;
        v.get("timestamp")
            .and_then(parse_u64)
            .ok_or_else(|| ClientError::Rpc(format!("missing timestamp for block {number}")))
    }

    /// Read-only contract call at the latest block.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, ClientError> {
        let v = self
            .request(
                "eth_call",
                json!([{ "to": format!("{to:?}"), "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        parse_bytes(&v).ok_or_else(|| ClientError::Rpc("malformed call result".to_string()))
    }

    pub async fn transaction_count(&self, address: Address) -> Result<u64, ClientError> {
        let v = self
            .request("eth_getTransactionCount", json!([format!("{address:?}"), "pending"]))
            .await?;
        parse_u64(&v).ok_or_else(|| ClientError::Rpc("malformed nonce".to_string()))
    }

    pub async fn gas_price(&self) -> Result<u128, ClientError> {
        let v = self.request("eth_gasPrice", json!([])).await?;
        parse_u128(&v).ok_or_else(|| ClientError::Rpc("malformed gas price".to_string()))
    }

    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: &[u8],
    ) -> Result<u64, ClientError> {
        let v = self
            .request(
                "eth_estimateGas",
                json!([{
                    "from": format!("{from:?}"),
                    "to": format!("{to:?}"),
                    "value": format!("0x{value:x}"),
                    "data": format!("0x{}", hex::encode(data)),
                }]),
            )
            .await?;
        parse_u64(&v).ok_or_else(|| ClientError::Rpc("malformed gas estimate".to_string()))
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ClientError> {
        let v = self
            .request("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        parse_b256(&v).ok_or_else(|| ClientError::Rpc("malformed transaction hash".to_string()))
    }

    /// `None` while the transaction is not yet included.
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>, ClientError> {
        let v = self
            .request("eth_getTransactionReceipt", json!([format!("{tx_hash:?}")]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }

        let block_number = v
            .get("blockNumber")
            .and_then(parse_u64)
            .ok_or_else(|| ClientError::Rpc("receipt missing block number".to_string()))?;
        let status_ok = v.get("status").and_then(parse_u64).unwrap_or(0) == 1;
        let logs = v
            .get("logs")
            .and_then(Value::as_array)
            .map(|logs| logs.iter().filter_map(parse_log).collect())
            .unwrap_or_default();

        Ok(Some(TxReceipt { tx_hash, block_number, status_ok, logs }))
    }

    /// Event logs for an address over a block range. `None` topics are
    /// wildcards.
    pub async fn logs(
        &self,
        address: Address,
        topics: Vec<Option<B256>>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogEntry>, ClientError> {
        let topics: Vec<Value> = topics
            .into_iter()
            .map(|t| t.map(|h| json!(format!("{h:?}"))).unwrap_or(Value::Null))
            .collect();
        let v = self
            .request(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{from_block:x}"),
                    "toBlock": format!("0x{to_block:x}"),
                    "address": format!("{address:?}"),
                    "topics": topics,
                }]),
            )
            .await?;
        Ok(v.as_array().map(|logs| logs.iter().filter_map(parse_log).collect()).unwrap_or_default())
    }

    /// Replay a failed call at its inclusion block to recover the revert
    /// reason. `None` when the node gives nothing usable.
    pub async fn revert_reason(
        &self,
        from: Address,
        to: Address,
        data: &[u8],
        block: u64,
    ) -> Option<String> {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{
                "from": format!("{from:?}"),
                "to": format!("{to:?}"),
                "data": format!("0x{}", hex::encode(data)),
            }, format!("0x{block:x}")],
        });

        let resp = self.client.post(&self.url).json(&req).send().await.ok()?;
        let body: Value = resp.json().await.ok()?;
        let err = body.get("error")?;

        if let Some(reason) = err.get("data").and_then(Value::as_str).and_then(decode_revert_data)
        {
            return Some(reason);
        }
        err.get("message").and_then(Value::as_str).map(str::to_string)
    }
}

/// Decode standard `Error(string)` revert data.
pub(crate) fn decode_revert_data(hex_data: &str) -> Option<String> {
    let bytes = hex::decode(hex_data.trim_start_matches("0x")).ok()?;
    // 4-byte Error(string) selector, then the ABI-encoded reason.
    if bytes.len() < 4 || bytes[..4] != [0x08, 0xc3, 0x79, 0xa0] {
        return None;
    }
    String::abi_decode(&bytes[4..]).ok()
}

fn parse_log(v: &Value) -> Option<LogEntry> {
    let address = v.get("address").and_then(Value::as_str)?.parse::<Address>().ok()?;
    let topics = v
        .get("topics")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|t| t.as_str()?.parse::<B256>().ok())
        .collect();
    let data = v
        .get("data")
        .and_then(Value::as_str)
        .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
        .unwrap_or_default();
    let block_number = v.get("blockNumber").and_then(parse_u64).unwrap_or(0);
    let log_index = v.get("logIndex").and_then(parse_u64).unwrap_or(0);
    let tx_hash = v
        .get("transactionHash")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<B256>().ok())
        .unwrap_or_default();

    Some(LogEntry { address, topics, data: data.into(), block_number, log_index, tx_hash })
}

fn parse_u64(v: &Value) -> Option<u64> {
    v.as_str().and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
}

fn parse_u128(v: &Value) -> Option<u128> {
    v.as_str().and_then(|s| u128::from_str_radix(s.trim_start_matches("0x"), 16).ok())
}

fn parse_b256(v: &Value) -> Option<B256> {
    v.as_str().and_then(|s| s.parse::<B256>().ok())
}

fn parse_bytes(v: &Value) -> Option<Bytes> {
    v.as_str().and_then(|s| hex::decode(s.trim_start_matches("0x")).ok()).map(Into::into)
}
