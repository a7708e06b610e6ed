//! On-chain contract-name registry.

use std::collections::HashMap;

use alloy_primitives::Address;
use alloy_sol_types::SolCall;
use tokio::sync::RwLock;

use paystream_attest::abi::getContractAddressByNameCall;

use crate::{error::ClientError, rpc::ChainRpc};

/// Registry names used by the pipeline.
pub const ATTESTATION_HUB: &str = "FdcHub";
pub const FEE_CONFIGURATION: &str = "FdcRequestFeeConfigurations";
pub const SYSTEMS_MANAGER: &str = "FlareSystemsManager";
pub const FINALITY_RELAY: &str = "Relay";
pub const ATTESTATION_VERIFICATION: &str = "FdcVerification";

/// Resolves protocol contract addresses by name, with a per-process cache.
/// Registry entries are stable within a deployment.
pub struct ContractRegistry {
    rpc: ChainRpc,
    address: Address,
    cache: RwLock<HashMap<String, Address>>,
}

impl ContractRegistry {
    pub fn new(rpc: ChainRpc, address: Address) -> Self {
        Self { rpc, address, cache: RwLock::new(HashMap::new()) }
    }

    /// Resolve a contract by registry name.
    pub async fn resolve(&self, name: &str) -> Result<Address, ClientError> {
        if let Some(addr) = self.cache.read().await.get(name) {
            return Ok(*addr);
        }

        let call = getContractAddressByNameCall { name: name.to_string() };
        let ret = self.rpc.call(self.address, &call.abi_encode()).await?;
        let addr = getContractAddressByNameCall::abi_decode_returns(&ret)
            .map_err(|e| ClientError::Rpc(format!("registry returned malformed address: {e}")))?;

        if addr == Address::ZERO {
            return Err(ClientError::Config(format!("registry has no entry for {name}")));
        }

        self.cache.write().await.insert(name.to_string(), addr);
        Ok(addr)
    }
}
