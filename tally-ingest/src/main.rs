use clap::Parser;
use std::sync::Arc;
use tally_core::config::WriteMode;
use tally_core::{aws, BedrockModel, ResultStore, S3ObjectSource, TallyConfig};
use tracing_subscriber::{fmt, EnvFilter};

use tally_ingest::pipeline::format_elapsed;
use tally_ingest::{BatchProcessor, BatchSettings, PromptChain};

/// Batch all PDF invoices under a bucket prefix: download them locally and
/// write the data extracted from each to a JSON file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The name of the S3 bucket
    #[arg(long, alias = "bucket_name")]
    bucket: String,

    /// Folder (key prefix) holding the invoices
    #[arg(long)]
    prefix: Option<String>,

    #[arg(short, long, default_value = "tally.toml")]
    config: String,

    /// Keep earlier results and only process new invoices
    #[arg(long)]
    append: bool,

    /// Log failed invoices and carry on instead of stopping the run
    #[arg(long)]
    continue_on_error: bool,
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

    // Load config
    let mut config = match TallyConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    // Command-line flags win over the file
    if args.append {
        config.output.mode = WriteMode::Append;
    }
    if args.continue_on_error {
        config.output.continue_on_error = true;
    }

    // AWS clients
    let sdk_config = aws::load_sdk_config(&config.aws).await;
    let source = S3ObjectSource::new(aws::s3_client(&sdk_config, &config.aws), &args.bucket);
    let model = BedrockModel::new(aws::bedrock_client(&sdk_config), config.model.clone());

    let processor = BatchProcessor::new(
        Arc::new(source),
        Arc::new(model),
        ResultStore::new(config.output.results_path()),
        PromptChain::from_config(&config.prompts),
        BatchSettings::from(&config.output),
    );

    // Run the batch
    let outcome = processor.run(args.prefix.as_deref()).await?;

    println!(
        "Processed {} invoices in {}",
        outcome.processed,
        format_elapsed(outcome.elapsed)
    );
    if outcome.skipped_existing > 0 {
        println!("Skipped {} invoices already in the results file", outcome.skipped_existing);
    }
    if !outcome.failed.is_empty() {
        println!("Failed {} invoices:", outcome.failed.len());
        for key in &outcome.failed {
            println!("  {}", key);
        }
    }
    println!(
        "Results: {} ({} records)",
        config.output.results_path().display(),
        outcome.total_records
    );
    println!(
        "To review the invoices and extracted data, run: tally-server --config {}",
        args.config
    );

    if !outcome.failed.is_empty() {
        std::process::exit(2);
    }

    Ok(())
}
