//!
//! icebase server binary
//! ----------------------
//! Command-line entry point for the append-only analytical table engine.
//! Parses flags (`-port`, `-post`, `-query-splitting`, `-log-level`,
//! `-version`, `-install-extensions`, `-load-extensions`), initialises
//! logging, then either serves HTTP or runs a single in-process `-post`
//! call, per spec.md §6.

use anyhow::Result;

use icebase::cli;
use icebase::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = cli::parse(&args);

    if parsed.version {
        cli::print_version();
        return Ok(());
    }

    let filter_spec =
        parsed.log_level.clone().or_else(|| std::env::var("RUST_LOG").ok()).unwrap_or_else(|| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_new(&filter_spec).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        target: "icebase",
        "starting: port={:?} post={:?} query_splitting={}",
        parsed.port, parsed.post, parsed.query_splitting
    );

    cli::dispatch(parsed, Config::default()).await
}
