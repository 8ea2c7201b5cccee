//! Command-line interface definitions for the AI security tracker.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. Every option can also be set through an environment variable, and
//! `main` loads a `.env` file before parsing.

use chrono::NaiveDate;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Command-line arguments for the AI security tracker.
///
/// # Examples
///
/// ```sh
/// # Serve the API on the default port, scanning every source hourly
/// ai_security_tracker --scan-interval-mins 60
///
/// # Scan one source from the shell
/// ai_security_tracker scan 3f0c2a8e-...
///
/// # Route scraping and LLM traffic through a local proxy
/// USE_PROXY=1 PROXY_URL=http://127.0.0.1:7890 ai_security_tracker monitor
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory holding websites.json, events.json and prompts.json
    #[arg(short, long, env = "DATA_DIR", default_value = "data", global = true)]
    pub data_dir: String,

    /// Address the HTTP API binds to
    #[arg(short, long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// API key for the LLM endpoint
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true, global = true)]
    pub llm_api_key: Option<String>,

    /// Model name sent with every chat completion
    #[arg(long, env = "GOOGLE_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub llm_model: String,

    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended)
    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub llm_base_url: String,

    /// Send scraping and LLM requests through `--proxy-url`
    #[arg(
        long,
        env = "USE_PROXY",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub use_proxy: bool,

    /// HTTP proxy used when `--use-proxy` is set
    #[arg(long, env = "PROXY_URL", default_value = "http://127.0.0.1:7890", global = true)]
    pub proxy_url: String,

    /// Scan every source this often while serving (disabled when unset or 0)
    #[arg(long, env = "SCAN_INTERVAL_MINS")]
    pub scan_interval_mins: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Scan one registered source and exit
    Scan {
        /// Id of the source to scan
        source_id: String,
    },
    /// Run the newsletter monitor once and exit
    Monitor {
        /// Newsletter archive page (defaults to https://tldr.tech/ai)
        url: Option<String>,
    },
    /// Print the daily summary report
    Report {
        /// Day to report on, as YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

impl Cli {
    /// The proxy to use for outbound requests, if enabled.
    pub fn proxy(&self) -> Option<&str> {
        self.use_proxy.then_some(self.proxy_url.as_str())
    }
}
