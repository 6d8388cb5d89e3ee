//! Engram server binary.
//!
//! Starts the engine through the lifecycle registry, serves the HTTP API
//! and the stdio tool protocol concurrently, and shuts both down in reverse
//! dependency order on interrupt or terminate.
//!
//! Exit codes: 0 normal, 1 configuration error, 2 dependency unreachable at
//! startup, 130 interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engram_core::{EngramConfig, EngramError};
use engram_mcp::context::AppContext;
use engram_mcp::protocol::StdioTransport;
use engram_mcp::server::ToolServer;

const EXIT_CONFIG: u8 = 1;
const EXIT_DEPENDENCY: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "engram-mcp", version, about = "Associative memory server for LLM agents")]
struct Args {
    /// Config file path; falls back to ENGRAM_CONFIG, then ./engram.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve the HTTP API only (no stdio tool protocol).
    #[arg(long)]
    http_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries JSON-RPC frames; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let config_path = args
        .config
        .or_else(|| std::env::var("ENGRAM_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("engram.toml"));

    let config = match EngramConfig::load_from(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!(version = engram_core::VERSION, "engram starting");

    let ctx = match AppContext::build(config).await {
        Ok(ctx) => ctx,
        Err(err) => return startup_failure(err),
    };
    if let Err(err) = ctx.start().await {
        return startup_failure(err);
    }

    // HTTP surface with graceful shutdown tied to the surfaces service.
    let http_task = {
        let ctx = Arc::clone(&ctx);
        let addr = ctx.config.http.listen_addr.clone();
        let mut shutdown_rx = ctx.shutdown.subscribe();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!(addr = %addr, error = %err, "failed to bind HTTP listener");
                    return;
                }
            };
            info!(addr = %addr, "HTTP API listening");
            let app = engram_mcp::api::router(ctx);
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            });
            if let Err(err) = serve.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    // stdio tool surface, unless running as a plain HTTP daemon.
    let stdio_task = if args.http_only {
        None
    } else {
        let server = ToolServer::new(Arc::clone(&ctx));
        let transport = StdioTransport::new(ctx.shutdown.subscribe());
        Some(tokio::spawn(async move {
            if let Err(err) = transport.run(server).await {
                error!(error = %err, "stdio transport error");
            }
        }))
    };

    // Wait for a signal (or stdin EOF when serving stdio).
    let interrupted = wait_for_shutdown(stdio_task.as_ref()).await;

    info!("shutting down");
    ctx.shutdown().await;
    if let Some(task) = stdio_task {
        let _ = task.await;
    }
    let _ = http_task.await;

    if interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}

fn startup_failure(err: EngramError) -> ExitCode {
    error!(error = %err, "startup failed");
    if err.is_retryable() {
        ExitCode::from(EXIT_DEPENDENCY)
    } else {
        ExitCode::from(EXIT_CONFIG)
    }
}

/// Resolve when the process should stop: interrupt, terminate, or the stdio
/// transport finishing (EOF). Returns whether a signal caused it.
async fn wait_for_shutdown(stdio: Option<&tokio::task::JoinHandle<()>>) -> bool {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    // The stdio surface ending (client closed stdin) also stops the server.
    let stdio_done = async {
        match stdio {
            Some(_task) => {
                // Poll the handle without consuming it.
                loop {
                    if _task.is_finished() {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("interrupt received");
            true
        }
        _ = terminate => {
            info!("terminate received");
            true
        }
        _ = stdio_done => {
            info!("stdio client disconnected");
            false
        }
    }
}
