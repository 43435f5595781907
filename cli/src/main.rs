use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use solana_sdk::signer::Signer;
use tracing_subscriber::EnvFilter;
use unlocker_client::{prepare_unlock, submit_unlock, DasClient, RpcSubmitClient};

mod config;

#[derive(Parser)]
#[clap(name = "unlocker", about = "Bulk-unlock Metaplex digital assets", version)]
struct Cli {
    /// Metaplex certified collection address (repeatable)
    #[clap(long, value_name = "PUBKEY")]
    collection: Vec<String>,

    /// First verified creator address (repeatable)
    #[clap(long, value_name = "PUBKEY")]
    creator: Vec<String>,

    /// Path to a hashlist: a JSON array of mint addresses
    #[clap(long, value_name = "PATH")]
    hashlist: Option<PathBuf>,

    /// Base58-encoded secret key
    #[clap(long, value_name = "KEY")]
    secret: Option<String>,

    /// Path to a JSON keypair file
    #[clap(long, value_name = "PATH")]
    keypair: Option<PathBuf>,

    /// RPC endpoint used for transaction submission
    #[clap(long, env = "RPC_HOST", value_name = "URL")]
    rpc_url: String,

    /// DAS registry endpoint used for asset discovery
    #[clap(long, env = "REGISTRY_URL", value_name = "URL")]
    registry_url: Option<String>,

    /// API key for the default registry endpoint
    #[clap(long, env = "HELIUS_API_KEY", value_name = "KEY")]
    helius_api_key: Option<String>,
}

async fn entry(cli: Cli) -> Result<()> {
    // All configuration errors surface here, before any network call.
    let selector =
        config::load_selector(&cli.collection, &cli.creator, cli.hashlist.as_deref())?;
    let keypair = config::load_keypair(cli.secret.as_deref(), cli.keypair.as_deref())?;
    let registry_url = config::registry_url(cli.registry_url, cli.helius_api_key)?;

    let registry = DasClient::new(registry_url);
    let submitter = RpcSubmitClient::new(&cli.rpc_url);

    println!("Fetching assets...");
    let prepared = prepare_unlock(&registry, &keypair.pubkey(), &selector).await?;

    println!("Unlocking {} assets...", prepared.asset_count());
    let report = submit_unlock(&submitter, &keypair, prepared).await?;

    println!(
        "Processed {} mints. Successes: {}, Errors: {}",
        report.processed, report.successes, report.failures
    );
    if report.dropped > 0 {
        println!(
            "{} assets could not be prepared and were skipped.",
            report.dropped
        );
    }
    if report.failures > 0 {
        println!("Re-run to retry errors.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    entry(cli).await
}
