//! Network presets and runtime configuration.

use alloy_primitives::{address, Address};

/// Contract-name registry address, identical across Flare-family networks.
pub const CONTRACT_REGISTRY: Address = address!("aD67FE66660Fb8dFE9d6b1b4240d8650e30F6019");

/// Destination chain for relayed payout receipts (Plasma testnet).
pub const DESTINATION_CHAIN_ID: u64 = 9746;
pub const DESTINATION_RPC: &str = "https://testnet-rpc.plasma.to";

/// Per-network endpoints and identifiers for the attestation pipeline.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_url: &'static str,
    pub da_layer_url: &'static str,
    pub verifier_url: &'static str,
}

pub const COSTON2: NetworkConfig = NetworkConfig {
    name: "coston2",
    chain_id: 114,
    rpc_url: "https://coston2-api.flare.network/ext/C/rpc",
    da_layer_url: "https://ctn2-data-availability.flare.network",
    verifier_url: "https://fdc-verifiers-testnet.flare.network",
};

pub const FLARE: NetworkConfig = NetworkConfig {
    name: "flare",
    chain_id: 14,
    rpc_url: "https://flare-api.flare.network/ext/C/rpc",
    da_layer_url: "https://flr-data-availability.flare.network",
    verifier_url: "https://fdc-verifiers-mainnet.flare.network",
};

impl NetworkConfig {
    /// Look up a preset by name.
    pub fn by_name(name: &str) -> eyre::Result<NetworkConfig> {
        match name {
            "coston2" => Ok(COSTON2),
            "flare" => Ok(FLARE),
            other => eyre::bail!("unknown network '{other}' (expected coston2 or flare)"),
        }
    }
}
