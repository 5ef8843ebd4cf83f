use std::{sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use eyre::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt::Subscriber, EnvFilter};

mod api;
mod backoff;
mod config;
mod error;
mod models;
mod quantity;
mod reader;
mod rpc;
mod session;
mod subscription;
#[cfg(test)]
mod testing;

use crate::backoff::BackoffConfig;
use crate::config::{ChainConfig, HistoryStrategy, UsdBasis};
use crate::error::Fetched;
use crate::reader::ChainReader;
use crate::rpc::HttpTransport;
use crate::session::{StaticPrice, WalletSession};
use crate::subscription::TransferSubscription;

#[derive(Parser, Debug)]
#[command(name = "givabit-chain", version)]
struct Cli {
    /// JSON-RPC HTTP(S) endpoint
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,

    /// JSON-RPC WebSocket endpoint for live transfer notifications
    #[arg(long, env = "WS_URL")]
    ws_url: Option<String>,

    /// Token contract address (0x...)
    #[arg(long, env = "TOKEN_CONTRACT")]
    token_contract: String,

    /// Decimals of the chain's native currency (deployment specific, e.g. 8 or 18)
    #[arg(long, env = "NATIVE_DECIMALS")]
    native_decimals: u8,

    /// Decimals of the token contract
    #[arg(long, env = "TOKEN_DECIMALS")]
    token_decimals: u8,

    /// USD price used to value balances; omitted means unknown
    #[arg(long, env = "USD_PRICE")]
    usd_price: Option<f64>,

    /// Which balance the USD price applies to
    #[arg(long, env = "USD_BASIS", value_enum, default_value_t = UsdBasis::Native)]
    usd_basis: UsdBasis,

    /// Per-call RPC timeout in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 20)]
    rpc_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show native and token balance of an address
    Balance { address: String },
    /// Scan recent blocks backwards for the latest transactions
    Scan {
        #[arg(default_value_t = 1)]
        count: usize,
        /// Only count transactions from or to this address
        #[arg(long)]
        involving: Option<String>,
    },
    /// Show recent token transfers sent or received by an address
    Transfers { address: String },
    /// Keep an address's balance and history fresh (and serve them over HTTP)
    Watch {
        address: String,
        #[arg(long, env = "REFRESH_SECS", default_value_t = 60)]
        refresh_secs: u64,
        #[arg(long, value_enum, default_value_t = HistoryStrategy::Logs)]
        history: HistoryStrategy,
        /// Transactions kept when history is `scan`
        #[arg(long, default_value_t = 5)]
        scan_count: usize,
        /// HTTP bind address for the state API (set to empty to disable)
        #[arg(long, env = "HTTP_BIND", default_value = "127.0.0.1:8080")]
        http_bind: String,
        #[arg(long, default_value_t = 8)]
        max_reconnects: u32,
    },
}

impl Cli {
    fn chain_config(&self) -> Result<ChainConfig> {
        let token = models::parse_address(&self.token_contract)?;
        let mut config = ChainConfig::new(self.rpc_url.clone(), token, self.native_decimals, self.token_decimals);
        config.ws_url = self.ws_url.clone().filter(|url| !url.is_empty());
        config.usd_price = self.usd_price;
        config.usd_basis = self.usd_basis;
        config.rpc_timeout = Duration::from_secs(self.rpc_timeout_secs);
        Ok(config)
    }
}

fn print_json<T: Serialize>(fetched: &Fetched<T>) -> Result<()> {
    if fetched.is_degraded() {
        tracing::warn!(warnings = fetched.warnings.len(), "result is partially degraded");
    }
    println!("{}", serde_json::to_string_pretty(fetched)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    Subscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = cli.chain_config()?;
    let transport = HttpTransport::new(config.rpc_url.clone(), config.rpc_timeout)?;
    let reader = ChainReader::new(transport, config.clone());

    match cli.command {
        Commands::Balance { address } => {
            let address = models::parse_address(&address)?;
            print_json(&reader.balance_snapshot(&address, config.usd_price).await?)?;
        }
        Commands::Scan { count, involving } => {
            let involving = involving.as_deref().map(models::parse_address).transpose()?;
            print_json(&reader.recent_transactions(count, involving).await?)?;
        }
        Commands::Transfers { address } => {
            let address = models::parse_address(&address)?;
            print_json(&reader.transfer_history(&address, config.token_contract).await?)?;
        }
        Commands::Watch { address, refresh_secs, history, scan_count, http_bind, max_reconnects } => {
            let wallet = models::parse_address(&address)?;
            let session = Arc::new(WalletSession::new(
                reader,
                wallet,
                history,
                scan_count,
                StaticPrice(config.usd_price),
            ));
            let (triggers, trigger_rx) = mpsc::channel(16);

            let ticker = session::spawn_ticker(Duration::from_secs(refresh_secs.max(1)), triggers.clone());

            let subscription_handle = match config.ws_url.clone() {
                Some(ws_url) => {
                    let backoff = BackoffConfig::default().with_max_attempts(max_reconnects);
                    let mut subscription = TransferSubscription::new(ws_url, config.token_contract, wallet, backoff);
                    Some(tokio::spawn(async move {
                        if let Err(e) = subscription.run(triggers).await {
                            tracing::error!(%e, "transfer subscription stopped; timer refresh continues");
                        }
                    }))
                }
                None => {
                    tracing::warn!("WS_URL not set, refreshing on timer only");
                    drop(triggers);
                    None
                }
            };

            let api_handle = if !http_bind.is_empty() {
                let state = session.subscribe();
                Some(tokio::spawn(async move {
                    if let Err(e) = api::serve(state, &http_bind).await {
                        tracing::error!(?e, "API server error");
                    }
                }))
            } else { None };

            tokio::select! {
                _ = session.clone().run(trigger_rx) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
            }

            ticker.abort();
            if let Some(h) = subscription_handle {
                h.abort();
            }
            if let Some(h) = api_handle {
                h.abort();
            }
        }
    }

    Ok(())
}
