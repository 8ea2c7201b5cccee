//! # AI Security Tracker
//!
//! Watches a curated list of AI-security research sites and newsletters,
//! lets an LLM pick the articles that describe real attacks, vulnerabilities
//! or research, summarizes each one into a structured event and serves the
//! results over a small HTTP API.
//!
//! ## Usage
//!
//! ```sh
//! ai_security_tracker                    # serve on 0.0.0.0:8000
//! ai_security_tracker scan <source-id>   # one scan, then exit
//! ai_security_tracker monitor            # newsletter monitor, then exit
//! ai_security_tracker report --date 2025-05-06
//! ```
//!
//! ## Architecture
//!
//! 1. **Link discovery**: fetch a source page and collect its anchors
//! 2. **Filtering**: an LLM picks the relevant article links
//! 3. **Analysis**: each article is fetched, stripped to text and summarized by the LLM
//! 4. **Storage**: new events are appended to flat JSON files, deduplicated by URL

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod error;
mod fetch;
mod llm;
mod models;
mod pipeline;
mod prompts;
mod report;
mod scheduler;
mod store;
mod utils;

use cli::{Cli, Command};
use fetch::HttpFetcher;
use llm::ChatClient;
use pipeline::monitor::DEFAULT_MONITOR_URL;
use pipeline::{Pipeline, RunOutcome};
use store::JsonStore;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // .env first so RUST_LOG and the CLI env fallbacks can come from it
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ai_security_tracker starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => debug!("No .env file"),
        Err(e) => warn!(error = %e, "Failed to load .env"),
    }

    // Parse CLI
    let args = Cli::parse();
    debug!(
        ?args.command,
        %args.data_dir,
        %args.llm_model,
        %args.llm_base_url,
        use_proxy = args.use_proxy,
        "Parsed CLI arguments"
    );

    // Early check: ensure the data dir is writable
    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir,
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let store = Arc::new(JsonStore::open(&args.data_dir).await?);
    let fetcher = Arc::new(HttpFetcher::new(args.proxy())?);
    let llm = Arc::new(ChatClient::new(
        &args.llm_base_url,
        &args.llm_model,
        args.llm_api_key.as_deref(),
        args.proxy(),
    )?);
    let pipeline = Pipeline::new(fetcher, llm, store);

    match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            match args.scan_interval_mins {
                Some(mins) if mins > 0 => {
                    scheduler::spawn_periodic_scan(pipeline.clone(), Duration::from_secs(mins * 60));
                }
                Some(_) => warn!("SCAN_INTERVAL_MINS is 0; periodic scanning disabled"),
                None => {}
            }
            api::serve(pipeline, &args.bind).await?;
        }
        Command::Scan { source_id } => {
            let source = pipeline.store().source(&source_id).await?;
            let outcome = pipeline.scan_source(&source).await;
            finish(&outcome)?;
        }
        Command::Monitor { url } => {
            let url = url.unwrap_or_else(|| DEFAULT_MONITOR_URL.to_string());
            let outcome = pipeline.monitor(&url).await;
            finish(&outcome)?;
        }
        Command::Report { date } => {
            let text = report::daily_report(pipeline.store(), date).await?;
            println!("{text}");
        }
    }

    let elapsed = start_time.elapsed();
    info!(elapsed_secs = elapsed.as_secs_f64(), "ai_security_tracker finished");
    Ok(())
}

/// Print a one-shot run's outcome; a failed run becomes the process error.
fn finish(outcome: &RunOutcome) -> Result<(), Box<dyn Error>> {
    println!("{outcome}");
    match outcome {
        RunOutcome::Failed { .. } => Err(outcome.to_string().into()),
        _ => Ok(()),
    }
}
