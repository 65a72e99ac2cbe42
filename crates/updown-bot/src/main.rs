//! updown-bot: autonomous 15-minute up/down trading agent.
//!
//! Usage:
//!   updown-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/bot.toml)
//!   --port <PORT>           API port (overrides config)
//!   --start-running         Start trading immediately instead of stopped

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use updown_bot::api;
use updown_bot::config::BotConfig;
use updown_bot::state::AppState;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "updown-bot")]
#[command(about = "Autonomous trading agent for 15-minute up/down markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// API port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Start the trading loop immediately instead of stopped
    #[arg(long)]
    start_running: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        BotConfig::default()
    };
    config.apply_env_overrides();
    if let Some(port) = args.port {
        config.api_port = port;
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("Starting updown-bot");
    info!("Asset: {}", config.asset);
    info!("Strategy: {}", config.strategy);
    info!("Scan interval: {}s", config.scan_interval_secs);

    config.validate().context("Configuration validation failed")?;

    let (state, feed) = AppState::build(&config).context("Failed to wire subsystems")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // Price feed task.
    tokio::spawn(feed.run(shutdown_tx.subscribe()));

    // Startup position sweep: resolved positions from previous runs get
    // enqueued before the first redemption tick. The factory-derived proxy
    // is not known until the engine's first run, so the configured one is
    // the best proxy address available here.
    {
        let scanner = Arc::clone(&state.scanner);
        let signer = state.signer_address.clone();
        let proxy = config.known_proxy_wallet.clone();
        tokio::spawn(async move {
            scanner.scan_once(&signer, proxy.as_deref()).await;
        });
    }

    // Coordinator loop.
    if args.start_running {
        state.coordinator.start();
    } else {
        info!("Bot is stopped; POST /api/bot/start to begin trading");
    }
    tokio::spawn(Arc::clone(&state.coordinator).run(shutdown_tx.subscribe()));

    // HTTP API.
    let router = api::router(Arc::clone(&state));
    let address = format!("0.0.0.0:{}", config.api_port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("API listening on http://{}", address);

    tokio::select! {
        result = axum::serve(listener, router) => {
            result.context("API server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    state.coordinator.stop();
    Ok(())
}
