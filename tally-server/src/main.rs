use clap::Parser;
use tally_core::TallyConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use tally_server::http;

/// Page through processed invoices in the browser.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tally.toml")]
    config: String,

    /// Results file to serve (overrides output.results_path)
    #[arg(long)]
    results: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config (optional for the viewer)
    let mut config = match TallyConfig::load_or_default(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(results) = args.results {
        config.output.results_path = results;
    }
    if let Some(host) = args.host {
        config.http.host = host;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    // Shutdown on Ctrl+C
    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // HTTP viewer
    http::start_http_server(config, tx.subscribe()).await?;

    Ok(())
}
