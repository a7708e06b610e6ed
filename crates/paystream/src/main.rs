use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use paystream::config::{NetworkConfig, CONTRACT_REGISTRY};
use paystream::persistence::SqliteDb;
use paystream_attest::WorkSource;
use paystream_client::da::DaClient;
use paystream_client::registry::ContractRegistry;
use paystream_client::{
    ChainFinality, ChainRpc, ClaimPipeline, PayrollContract, PollOptions, RoundScheduler,
    TxSender, VerifierClient,
};

#[derive(Parser)]
#[command(name = "paystream")]
#[command(about = "Run one verified claim for an escrowed payment stream")]
struct Args {
    /// Network preset: coston2 or flare
    #[arg(long, default_value = "coston2", env = "PAYSTREAM_NETWORK")]
    network: String,

    /// Settlement contract address
    #[arg(long, env = "PAYROLL_ADDRESS")]
    payroll_address: Address,

    /// Stream to claim for
    #[arg(long, env = "STREAM_ID")]
    stream_id: u64,

    /// Repository whose commits are the work evidence (owner/repo)
    #[arg(long, env = "GITHUB_REPO", conflicts_with = "doc_file_id")]
    repo: Option<String>,

    /// Document id whose revisions are the work evidence
    #[arg(long, env = "DOC_FILE_ID", requires = "doc_access_token")]
    doc_file_id: Option<String>,

    /// Bearer token for the document revisions listing
    #[arg(long, env = "DOC_ACCESS_TOKEN")]
    doc_access_token: Option<String>,

    /// Fee-paying and claiming key (hex)
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Preparer API key
    #[arg(
        long,
        env = "VERIFIER_API_KEY",
        default_value = "00000000-0000-0000-0000-000000000000"
    )]
    verifier_api_key: String,

    /// Maximum seconds to wait for round finalization (0 = unbounded)
    #[arg(long, default_value = "900")]
    finality_max_wait: u64,

    /// Maximum seconds to wait for proof materialization (0 = unbounded)
    #[arg(long, default_value = "600")]
    proof_max_wait: u64,

    /// Resume/dedupe database path
    #[arg(long, default_value = "paystream.db", env = "PAYSTREAM_DB")]
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

    let source = match (&args.repo, &args.doc_file_id) {
        (Some(repo), _) => WorkSource::GitRepository { repo: repo.clone() },
        (None, Some(file_id)) => WorkSource::DocumentRevisions {
            file_id: file_id.clone(),
            access_token: args.doc_access_token.clone().unwrap_or_default(),
        },
        (None, None) => eyre::bail!("set --repo or --doc-file-id"),
    };

    let signer: PrivateKeySigner =
        args.private_key.parse().map_err(|e| eyre::eyre!("invalid private key: {e}"))?;

    info!(network = network.name, stream = args.stream_id, "starting claim pipeline");

    let rpc = ChainRpc::new(network.rpc_url);
    let tx = Arc::new(TxSender::new(rpc.clone(), signer, network.chain_id));
    let registry = Arc::new(ContractRegistry::new(rpc.clone(), CONTRACT_REGISTRY));
    let store = Arc::new(SqliteDb::open(&args.db)?);

    let pipeline = ClaimPipeline::builder()
        .preparer(Arc::new(VerifierClient::new(network.verifier_url, args.verifier_api_key.clone())))
        .submitter(Arc::new(RoundScheduler::new(registry.clone(), tx.clone(), store)))
        .oracle(Arc::new(ChainFinality::new(rpc.clone(), registry)))
        .proof_source(Arc::new(DaClient::new(network.da_layer_url)))
        .ledger(Arc::new(PayrollContract::new(tx, args.payroll_address)))
        .finality_poll(poll_options(args.finality_max_wait))
        .proof_poll(poll_options(args.proof_max_wait))
        .build()
        .start();

    // Mirror progress events into the log as they happen.
    let mut events = pipeline.stream_events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "paystream::events", "{json}"),
                Err(e) => error!(target: "paystream::events", "failed to serialize event: {e}"),
            }
        }
    });

    match pipeline.run(args.stream_id, &source).await {
        Ok(confirmed) => {
            info!(
                stream = args.stream_id,
                tx = %confirmed.tx_hash,
                amount = %confirmed.amount_native,
                usd = %confirmed.amount_usd,
                bonus = confirmed.bonus_triggered,
                units = confirmed.unit_count,
                "claim settled"
            );
            Ok(())
        }
        Err(e) => {
            error!(stream = args.stream_id, error = %e, "claim pipeline failed");
            Err(e.into())
        }
    }
}

fn poll_options(max_wait_secs: u64) -> PollOptions {
    PollOptions {
        interval: Duration::from_secs(10),
        max_wait: (max_wait_secs > 0).then(|| Duration::from_secs(max_wait_secs)),
    }
}
