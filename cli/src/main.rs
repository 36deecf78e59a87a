//! ChainConnect CLI: inspect chains, blocks and balances from the terminal.
//!
//! # Commands
//! ```text
//! chainconnect chains       [--json]
//! chainconnect block        --chain-id <id> [--rpc <url>]
//! chainconnect watch-blocks --chain-id <id> [--rpc <url>] [--interval-ms <ms>]
//! chainconnect balance      --address <addr> --chain-id <id> [--rpc <url>]
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chainconnect::{chains, Address, ChainDescriptor, ChainId, Client, ClientConfig, LogConfig};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chainconnect",
    about = "ChainConnect CLI: chains, blocks and balances",
    long_about = "
ChainConnect CLI: query the chains the client library knows about.

ENVIRONMENT VARIABLES:
  RUST_LOG   Log filter, overrides --verbose and the config file
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Client configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in chain catalogue
    Chains {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the latest block number
    Block {
        #[command(flatten)]
        chain: ChainArgs,
    },

    /// Print new block numbers until interrupted
    #[command(name = "watch-blocks")]
    WatchBlocks {
        #[command(flatten)]
        chain: ChainArgs,
        /// Polling interval in milliseconds (overrides the config file)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Print the native balance of an address
    Balance {
        /// Account address (0x-prefixed)
        #[arg(long)]
        address: String,
        #[command(flatten)]
        chain: ChainArgs,
    },
}

#[derive(clap::Args)]
struct ChainArgs {
    /// EVM chain ID (default: 1 = Ethereum mainnet)
    #[arg(long, default_value_t = chains::ids::MAINNET)]
    chain_id: ChainId,
    /// Use this RPC URL instead of the chain's public endpoints
    #[arg(long)]
    rpc: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let log = if cli.verbose {
        LogConfig {
            level: "debug".into(),
            ..config.log.clone()
        }
    } else {
        config.log.clone()
    };
    chainconnect::init_tracing(&log).map_err(|e| anyhow!("tracing init failed: {e}"))?;

    match cli.command {
        Commands::Chains { json } => cmd_chains(json),
        Commands::Block { chain } => cmd_block(config, chain).await,
        Commands::WatchBlocks { chain, interval_ms } => {
            if let Some(ms) = interval_ms {
                config.polling_interval_ms = ms;
            }
            cmd_watch_blocks(config, chain).await
        }
        Commands::Balance { address, chain } => cmd_balance(config, &address, chain).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    ClientConfig::from_yaml(&yaml).with_context(|| format!("parsing config {}", path.display()))
}

/// A client over the one chain `args` names.
fn client_for(config: ClientConfig, args: &ChainArgs) -> Result<Client> {
    let mut chain = match chains::by_id(args.chain_id) {
        Some(chain) => chain,
        None => {
            let rpc = args
                .rpc
                .clone()
                .ok_or_else(|| anyhow!("chain {} is not built in; pass --rpc", args.chain_id))?;
            ChainDescriptor::new(args.chain_id, format!("Chain {}", args.chain_id), vec![rpc])
        }
    };
    if let Some(rpc) = &args.rpc {
        chain.rpc_urls = vec![rpc.clone()];
    }
    tracing::debug!(chain_id = chain.id, rpc = ?chain.rpc_urls, "building client");

    Ok(Client::builder().chain(chain).config(config).build()?)
}

// ─── Commands ────────────────────────────────────────────────────────────────

fn cmd_chains(json: bool) -> Result<()> {
    let catalogue = chains::all_chains();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalogue)?);
        return Ok(());
    }

    println!("{:<10} {:<18} {:<8} {:<10} RPC", "ID", "NAME", "SYMBOL", "MULTICALL");
    for chain in &catalogue {
        println!(
            "{:<10} {:<18} {:<8} {:<10} {}",
            chain.id,
            chain.name,
            chain.native_currency.symbol,
            if chain.multicall.is_some() { "yes" } else { "no" },
            chain.rpc_urls.first().map(String::as_str).unwrap_or("-"),
        );
    }
    Ok(())
}

async fn cmd_block(config: ClientConfig, args: ChainArgs) -> Result<()> {
    let client = client_for(config, &args)?;
    let start = std::time::Instant::now();
    let block = client.fetch_block_number(None).await?;
    println!("  Chain:        {}", args.chain_id);
    println!("  Block number: {block}");
    println!("  Latency:      {}ms", start.elapsed().as_millis());
    Ok(())
}

async fn cmd_watch_blocks(config: ClientConfig, args: ChainArgs) -> Result<()> {
    let client = client_for(config, &args)?;
    println!("Watching blocks on chain {} (Ctrl-C to stop)...", args.chain_id);

    let unwatch = client.watch_block_number(None, |number| println!("  block {number}"))?;
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    unwatch.cancel();
    client.destroy();
    Ok(())
}

async fn cmd_balance(config: ClientConfig, address: &str, args: ChainArgs) -> Result<()> {
    let address: Address = address
        .parse()
        .with_context(|| format!("invalid address {address}"))?;
    let client = client_for(config, &args)?;
    let balance = client.fetch_balance(address, None).await?;
    println!("  Address: {address}");
    println!("  Balance: {} {}", balance.formatted, balance.symbol);
    println!("  Raw:     {}", balance.value);
    Ok(())
}
