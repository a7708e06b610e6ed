//! Canonical attestation-request building.

use alloy_primitives::{keccak256, Bytes, B256};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

/// Attestation type tag for JSON-over-HTTP observations.
pub const ATTESTATION_TYPE: &str = "Web2Json";

/// Source tag for publicly reachable endpoints.
pub const SOURCE_TAG: &str = "PublicWeb2";

/// Filter reducing a commit listing to its length.
const COMMIT_COUNT_FILTER: &str = "{commitCount: . | length}";

/// Filter reducing a revision listing to its length.
const REVISION_COUNT_FILTER: &str = "{commitCount: .revisions | length}";

/// ABI signature of the post-processed payload: a single uint256 unit count.
/// Part of the integrity guarantee; providers cannot reinterpret the response.
const UNIT_COUNT_ABI: &str = r#"{"components": [{"internalType": "uint256", "name": "commitCount", "type": "uint256"}], "name": "task", "type": "tuple"}"#;

/// A work-evidence source the attestation network can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkSource {
    /// Public repository; units are commits.
    GitRepository { repo: String },
    /// Document revision history; units are revisions. The bearer token is
    /// part of the request so providers can fetch the listing themselves.
    /// The revisions endpoint has no since filter, so the cursor only
    /// applies to repositories.
    DocumentRevisions { file_id: String, access_token: String },
}

/// Request body in the attestation network's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    pub url: String,
    pub http_method: String,
    pub headers: String,
    pub query_params: String,
    pub body: String,
    #[serde(rename = "postProcessJq")]
    pub post_process_filter: String,
    pub abi_signature: String,
}

/// A fully built attestation request.
///
/// Building is deterministic and side-effect free: the same source and
/// cursor always produce the same request, which is what makes descriptor
/// bytes usable as an idempotency key downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRequest {
    /// Type tag as 0x-hex of the padded bytes32.
    pub attestation_type: String,
    /// Source tag as 0x-hex of the padded bytes32.
    pub source_id: String,
    pub request_body: RequestBody,
}

impl AttestationRequest {
    /// Build the canonical request for a source and an optional since
    /// cursor. `None` covers all history and is only correct for a
    /// stream's very first claim.
    pub fn build(source: &WorkSource, since: Option<u64>) -> Self {
        let (url, headers, filter) = match source {
            WorkSource::GitRepository { repo } => {
                let url = match since {
                    Some(ts) => {
                        format!("https://api.github.com/repos/{repo}/commits?since={}", rfc3339(ts))
                    }
                    None => format!("https://api.github.com/repos/{repo}/commits"),
                };
                (url, "{}".to_string(), COMMIT_COUNT_FILTER)
            }
            WorkSource::DocumentRevisions { file_id, access_token } => {
                let url = format!(
                    "https://www.googleapis.com/drive/v3/files/{file_id}/revisions?fields=revisions(id)"
                );
                let headers =
                    serde_json::json!({ "Authorization": format!("Bearer {access_token}") })
                        .to_string();
                (url, headers, REVISION_COUNT_FILTER)
            }
        };

        Self {
            attestation_type: format!("0x{}", hex::encode(tag_to_bytes32(ATTESTATION_TYPE))),
            source_id: format!("0x{}", hex::encode(tag_to_bytes32(SOURCE_TAG))),
            request_body: RequestBody {
                url,
                http_method: "GET".to_string(),
                headers,
                query_params: "{}".to_string(),
                body: "{}".to_string(),
                post_process_filter: filter.to_string(),
                abi_signature: UNIT_COUNT_ABI.to_string(),
            },
        }
    }
}

/// Opaque ABI-encoded request descriptor returned by the preparer service.
/// Two requests are semantically equal iff their descriptors are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor(pub Bytes);

impl RequestDescriptor {
    /// Dedupe key for persisted submission records.
    pub fn hash(&self) -> B256 {
        keccak256(&self.0)
    }
}

/// Encode a short UTF-8 tag as a right-zero-padded bytes32.
pub fn tag_to_bytes32(tag: &str) -> B256 {
    let mut out = [0u8; 32];
    let bytes = tag.as_bytes();
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    B256::from(out)
}

fn rfc3339(unix_ts: u64) -> String {
    DateTime::from_timestamp(unix_ts as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
