//! Mirror Bot
//!
//! Follows a trader's public futures trade history and mirrors new orders
//! onto your own account.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use history_tracker::{JsonFileStore, WebDriverSource};
use mirror_bot::MirrorSession;
use mirror_core::api::{BinanceCredentials, BinanceFuturesClient, ExchangeClient};
use mirror_core::config::SessionConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_LOG_FILTER: &str =
    "mirror_bot=info,history_tracker=info,trading_engine=info,mirror_core=warn";

#[derive(Parser, Debug)]
#[command(name = "mirror-bot")]
#[command(about = "Mirror a trader's futures trade history onto your account")]
#[command(version)]
struct Args {
    /// Config file path (TOML); `MIRROR_*` environment variables override it
    #[arg(short, long, env = "MIRROR_CONFIG")]
    config: Option<String>,

    /// Submit real orders regardless of `live_trading`
    #[arg(long)]
    live: bool,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headed: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting trade mirror");

    let mut config =
        SessionConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if args.live {
        config.live_trading = true;
    }
    if !config.live_trading {
        warn!("Paper trading: orders are logged, not sent");
    }

    let credentials = BinanceCredentials::new(&config.api_key, &config.api_secret);
    let exchange: Arc<dyn ExchangeClient> = Arc::new(
        BinanceFuturesClient::new(config.exchange_base_url.clone(), Some(credentials))?
            .with_recv_window(config.timing.recv_window_ms),
    );

    let source = WebDriverSource::connect(&config.webdriver_url, !args.headed)
        .await
        .with_context(|| format!("failed to start browser session at {}", config.webdriver_url))?;
    let store = Arc::new(JsonFileStore::new(config.snapshot_path.clone()));

    let session = MirrorSession::connect(config, source, exchange, store).await?;

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after the current cycle");
            handle.stop();
        }
    });

    let stats = session.run().await?;
    info!(
        cycles = stats.cycles,
        mirrored = stats.mirrored,
        failed = stats.failed,
        "Trade mirror exited"
    );
    Ok(())
}
