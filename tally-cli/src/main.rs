//! tally-cli: terminal companion to the invoice batch and viewer
//!
//! # Subcommands
//! - `report [--results <path>] [--json]`: totals over a local results file
//! - `status`                             : show viewer health
//! - `list`                               : list records served by the viewer

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tally_core::{BatchReport, ResultStore, TallyConfig};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8501";
const SUMMARY_WIDTH: usize = 80;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tally-cli", version, about = "Tally invoice batch reports and viewer status")]
struct Cli {
    /// Tally viewer URL (overrides TALLY_HTTP_URL env var)
    #[arg(long, env = "TALLY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize a results file: count, totals per currency, vendors
    Report {
        /// Results file (defaults to output.results_path from the config)
        #[arg(long)]
        results: Option<String>,

        #[arg(short, long, default_value = "tally.toml")]
        config: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show viewer status
    Status,

    /// List the invoices the viewer is serving
    List,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One entry of GET /api/invoices
#[derive(Debug, Deserialize)]
pub struct InvoiceSummary {
    pub index: usize,
    pub source: String,
    pub has_pdf: bool,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceListResponse {
    pub count: usize,
    pub invoices: Vec<InvoiceSummary>,
}

// ============================================================================
// Formatting
// ============================================================================

/// Human-readable report.
pub fn format_report(report: &BatchReport) -> String {
    let mut out = format!("Invoices:  {}\n", report.total_invoices);

    if report.totals.is_empty() {
        out.push_str("Totals:    none\n");
    } else {
        out.push_str("Totals:\n");
        for (currency, total) in &report.totals {
            out.push_str(&format!("  {:<8} {:>14}\n", currency, total));
        }
    }

    out.push_str(&format!("Vendors:   {}\n", report.unique_vendors.len()));
    for vendor in &report.unique_vendors {
        out.push_str(&format!("  {}\n", vendor));
    }

    if !report.invoice_numbers.is_empty() {
        out.push_str(&format!("Invoice numbers: {}\n", report.invoice_numbers.join(", ")));
    }
    if !report.unparsed_amounts.is_empty() {
        out.push_str(&format!(
            "No readable amount: {}\n",
            report.unparsed_amounts.join(", ")
        ));
    }

    out
}

/// First line of the summary, capped at `SUMMARY_WIDTH` characters.
pub fn summary_line(summary: &str) -> String {
    let first = summary.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first.chars().count() > SUMMARY_WIDTH {
        let cut: String = first.chars().take(SUMMARY_WIDTH - 1).collect();
        format!("{}…", cut)
    } else {
        first.to_string()
    }
}

pub fn format_list(list: &InvoiceListResponse) -> String {
    if list.invoices.is_empty() {
        return "No invoices\n".to_string();
    }

    let mut out = String::new();
    for invoice in &list.invoices {
        let marker = if invoice.has_pdf { " " } else { "!" };
        out.push_str(&format!("{:>4} {} {}\n", invoice.index, marker, invoice.source));
        let summary = summary_line(&invoice.summary);
        if !summary.is_empty() {
            out.push_str(&format!("       {}\n", summary));
        }
    }
    out.push_str(&format!("{} invoices\n", list.count));
    out
}

// ============================================================================
// Commands
// ============================================================================

fn do_report(results: Option<String>, config_path: &str, json_output: bool) -> anyhow::Result<()> {
    let path = match results {
        Some(p) => p.into(),
        None => TallyConfig::load_or_default(config_path)?.output.results_path(),
    };

    let records = ResultStore::new(&path).load_blocking()?;
    let report = BatchReport::from_records(&records);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Results:   {}", path.display());
        print!("{}", format_report(&report));
    }

    Ok(())
}

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Show the viewer status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);

    match client(10)?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Tally viewer: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Records:      {}", body["records"].as_u64().unwrap_or(0));
            println!("Results:      {}", body["results_path"].as_str().unwrap_or("?"));
            println!("Downloads:    {}", body["download_dir"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            let body: serde_json::Value = r.json().unwrap_or_default();
            eprintln!(
                "tally-cli: viewer unhealthy (HTTP {}): {}",
                status,
                body["error"].as_str().unwrap_or("")
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("tally-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_list(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/invoices", server);

    let resp = match client(30)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tally-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("tally-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let list: InvoiceListResponse = resp.json()?;
    print!("{}", format_list(&list));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Report {
            results,
            config,
            json,
        } => do_report(results, &config, json),
        Commands::Status => do_status(&server),
        Commands::List => do_list(&server),
    };

    if let Err(e) = result {
        eprintln!("tally-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
