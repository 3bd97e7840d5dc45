//! C9 — CLI front-end.
//!
//! Flag parsing matches spec.md §6 exactly: `-port`, `-post <endpoint>`,
//! `-query-splitting`, `-log-level`, `-version`, `-install-extensions`,
//! `-load-extensions`. Hand-rolled, scanning the argument list by hand in
//! the style of the teacher's `clarium_server`/`csql` binaries rather than a
//! derive-macro CLI parser — this keeps the flag syntax the single-dash
//! form the spec names (`-port`, not `--port`).
//!
//! This module only resolves flags and wires the engine stack together;
//! process entry (reading `std::env::args()`, initialising `tracing`, and
//! calling [`dispatch`]) lives in `src/bin/icebase_server.rs`, matching how
//! the teacher keeps binary-specific bootstrapping out of the library crate.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::engine::{DuckDbEngine, Engine};
use crate::log_store::LogStore;
use crate::server::{self, AppState};
use crate::storage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub port: Option<u16>,
    pub post: Option<String>,
    pub query_splitting: bool,
    pub log_level: Option<String>,
    pub version: bool,
    pub install_extensions: bool,
    pub load_extensions: bool,
}

/// Parse flags from an already-stripped argument list (i.e. `argv[1..]`).
/// Unrecognised tokens are ignored, matching the teacher's tolerant flag
/// scanners rather than erroring on an unknown flag.
pub fn parse(args: &[String]) -> CliArgs {
    let mut out = CliArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-port" if i + 1 < args.len() => {
                out.port = args[i + 1].parse().ok();
                i += 2;
            }
            "-post" if i + 1 < args.len() => {
                out.post = Some(args[i + 1].clone());
                i += 2;
            }
            "-log-level" if i + 1 < args.len() => {
                out.log_level = Some(args[i + 1].clone());
                i += 2;
            }
            "-query-splitting" => {
                out.query_splitting = true;
                i += 1;
            }
            "-version" => {
                out.version = true;
                i += 1;
            }
            "-install-extensions" => {
                out.install_extensions = true;
                i += 1;
            }
            "-load-extensions" => {
                out.load_extensions = true;
                i += 1;
            }
            _ => {
                i += 1;
            }
        }
    }
    out
}

pub fn print_version() {
    println!("icebase {}", env!("CARGO_PKG_VERSION"));
}

/// Resolve `cli` against a base `Config` (CLI flags win over environment
/// defaults), build the storage/log/engine stack, and either serve HTTP or
/// run a single in-process `-post` call.
pub async fn dispatch(cli: CliArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(port) = cli.port {
        config.http_port = port;
    }
    config.query_splitting = config.query_splitting || cli.query_splitting;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    info!(
        target: "icebase::cli",
        "resolved config: http_port={} query_splitting={} storage={:?}",
        config.http_port, config.query_splitting, config.storage
    );

    let storage = storage::build(&config.storage)?;

    let duck = DuckDbEngine::open_in_memory()?;
    if cli.install_extensions {
        duck.install_extensions()?;
    }
    if cli.load_extensions {
        duck.load_extensions()?;
    }
    let engine: Arc<dyn Engine> = Arc::new(duck);

    let log_store = Arc::new(LogStore::new(config.log_root.clone(), storage.clone()));
    let dispatcher = Arc::new(Dispatcher::new(engine, log_store, storage));

    match &cli.post {
        Some(endpoint) => run_post_client(endpoint, dispatcher.as_ref(), &config).await,
        None => {
            let state = AppState { dispatcher, config: Arc::new(config) };
            server::run(state).await
        }
    }
}

/// `-post <endpoint>`: reads the request body from stdin, invokes the
/// matching in-process handler directly (`/query` or `/parse`), and writes
/// the JSON response to stdout. This mirrors spec.md §6's description of
/// `-post` as an in-process call, not a loopback HTTP request — no server
/// needs to be running.
async fn run_post_client(endpoint: &str, dispatcher: &Dispatcher, config: &Config) -> anyhow::Result<()> {
    let mut body = String::new();
    std::io::stdin().read_to_string(&mut body)?;

    let value = match endpoint {
        "/query" => {
            let started = std::time::Instant::now();
            match dispatcher.handle_query(&body, config.query_splitting).await {
                Ok(result) => server::query_response_body(&result, started.elapsed().as_secs_f64()),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        "/parse" => {
            let classified = dispatcher.classify(&body);
            serde_json::json!({
                "operation": server::operation_name(classified.operation),
                "table": classified.table,
            })
        }
        other => {
            eprintln!("unknown -post endpoint '{}' (expected /query or /parse)", other);
            std::process::exit(2);
        }
    };

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer(&mut handle, &value)?;
    handle.write_all(b"\n")?;
    Ok(())
}
