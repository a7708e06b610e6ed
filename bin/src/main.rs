use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use paystream::config::{NetworkConfig, DESTINATION_CHAIN_ID, DESTINATION_RPC};
use paystream::persistence::SqliteDb;
use paystream_client::relay::ChainPayoutSink;
use paystream_client::{ChainRpc, RelayForwarder, TxSender};

#[derive(Parser)]
#[command(name = "paystream-relayer")]
#[command(about = "Mirror confirmed claim events into destination-ledger receipts")]
struct Args {
    /// Source network preset: coston2 or flare
    #[arg(long, default_value = "coston2", env = "PAYSTREAM_NETWORK")]
    network: String,

    /// Settlement contract emitting claim events on the source chain
    #[arg(long, env = "PAYROLL_ADDRESS")]
    payroll_address: Address,

    /// Payout contract on the destination chain
    #[arg(long, env = "PAYOUT_ADDRESS")]
    payout_address: Address,

    /// Destination chain RPC endpoint
    #[arg(long, default_value = DESTINATION_RPC, env = "DESTINATION_RPC")]
    destination_rpc: String,

    /// Restricted destination-writer key (hex)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Blocks behind the saved cursor to replay on startup
    #[arg(long, default_value = "1000")]
    lookback: u64,

    /// First block that can contain claim events
    #[arg(long, default_value = "0", env = "PAYROLL_DEPLOY_BLOCK")]
    deploy_block: u64,

    /// Cursor database path
    #[arg(long, default_value = "paystream-relayer.db", env = "PAYSTREAM_RELAYER_DB")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let network = NetworkConfig::by_name(&args.network)?;

    let signer: PrivateKeySigner =
        args.private_key.parse().map_err(|e| eyre::eyre!("invalid private key: {e}"))?;

    let destination_rpc = ChainRpc::new(args.destination_rpc.clone());
    let destination = Arc::new(TxSender::new(destination_rpc, signer, DESTINATION_CHAIN_ID));
    let sink = Arc::new(ChainPayoutSink::new(destination, args.payout_address));
    let store = Arc::new(SqliteDb::open(&args.db)?);

    let forwarder = RelayForwarder::builder()
        .source(ChainRpc::new(network.rpc_url))
        .source_ws_url(network.rpc_url.to_string())
        .payroll_address(args.payroll_address)
        .sink(sink)
        .store(store)
        .lookback_blocks(args.lookback)
        .deploy_block(args.deploy_block)
        .build()
        .start();

    info!(
        network = network.name,
        payroll = %args.payroll_address,
        payout = %args.payout_address,
        "relay forwarder starting"
    );

    let mut events = forwarder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "paystream::relay_events", "{json}"),
                Err(e) => {
                    error!(target: "paystream::relay_events", "failed to serialize event: {e}")
                }
            }
        }
    });

    if let Err(e) = forwarder.run().await {
        error!(error = %e, "relay forwarder stopped");
        return Err(e.into());
    }
    Ok(())
}
