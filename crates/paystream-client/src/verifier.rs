//! Attestation preparer client: logical request to opaque descriptor.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use paystream_attest::{AttestationRequest, RequestDescriptor};

use crate::error::ClientError;

const PREPARE_PATH: &str = "/verifier/web2/Web2Json/prepareRequest";

/// Turns a canonical request into its submittable byte descriptor.
///
/// This is the only network step of request building and causes no state
/// change on any ledger.
#[async_trait]
pub trait RequestPreparer: Send + Sync {
    async fn prepare(&self, request: &AttestationRequest) -> Result<RequestDescriptor, ClientError>;
}

/// HTTP client for the attestation network's preparer service.
pub struct VerifierClient {
    client: Client,
    base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct PrepareResponse {
    #[serde(rename = "abiEncodedRequest")]
    abi_encoded_request: String,
}

impl VerifierClient {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RequestPreparer for VerifierClient {
    async fn prepare(&self, request: &AttestationRequest) -> Result<RequestDescriptor, ClientError> {
        let url = format!("{}{}", self.base, PREPARE_PATH);

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Verifier(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Verifier(format!("preparer returned {status}: {body}")));
        }

        let prepared: PrepareResponse =
            response.json().await.map_err(|e| ClientError::Verifier(e.to_string()))?;
        let bytes = hex::decode(prepared.abi_encoded_request.trim_start_matches("0x"))
            .map_err(|e| ClientError::Verifier(format!("malformed descriptor: {e}")))?;

        Ok(RequestDescriptor(bytes.into()))
    }
}
