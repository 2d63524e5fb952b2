// src/main.rs

//! The main entry point for the membership-agent demo binary.
//!
//! This is not the RPC framework; it is a thin runnable shell around
//! `ClusterManagerHandle` that loads configuration, connects to the
//! coordination store, logs every published view change, and serves a
//! minimal text endpoint for health/metrics scraping. Real embedders are
//! expected to depend on the library crate directly and drive
//! `ClusterManagerHandle` from their own process.

use anyhow::{Context, Result};
use membership_core::{ClusterManagerHandle, Event, MembershipConfig};
use membership_core::store::zk::ZkStoreFactory;
use std::env;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    if args.contains(&"--version".to_string()) {
        println!("membership-agent version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match MembershipConfig::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter.clone()),
        )
        .compact()
        .with_ansi(true)
        .init();

    info!(
        "membership-agent {} starting, coordination store {}, cluster root {}",
        VERSION, config.connect_string, config.cluster_root
    );

    let factory = Arc::new(ZkStoreFactory::new(
        config.connect_string.clone(),
        config.session_timeout,
    ));
    let manager = ClusterManagerHandle::spawn(config.cluster_root.clone(), factory)
        .context("failed to open the initial coordination store session")?;

    let (_listener_id, mut events) = manager.subscribe().await;
    let view_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Connected(view) => {
                    info!("connected; cluster view has {} member(s)", view.len());
                }
                Event::Disconnected => {
                    warn!("disconnected from the coordination store");
                }
                Event::NodesChanged(view) => {
                    info!("cluster view updated, {} member(s)", view.len());
                }
                Event::Shutdown => {
                    info!("notification stream shut down");
                    break;
                }
            }
        }
    });

    let health_listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind health endpoint on {}", config.listen_addr))?;
    info!("health/metrics endpoint listening on {}", config.listen_addr);
    let health_task = tokio::spawn(run_health_endpoint(health_listener));

    await_shutdown_signal().await;
    info!("shutdown signal received, closing the coordination store session");
    manager.shutdown();
    health_task.abort();

    let _ = view_logger.await;
    Ok(())
}

/// Serves `membership_core::metrics::gather_metrics()` as a plaintext body
/// to any connection, regardless of the request line — enough for a liveness
/// probe or a Prometheus scrape target without pulling in a full HTTP stack.
async fn run_health_endpoint(listener: TcpListener) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("health endpoint accept failed: {}", e);
                continue;
            }
        };
        tokio::spawn(serve_health_connection(stream));
    }
}

async fn serve_health_connection(stream: TcpStream) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = stream;
    let mut buf = [0u8; 1024];
    // Drain (and ignore) whatever request the client sent; this endpoint
    // doesn't route on path or method.
    let _ = stream.read(&mut buf).await;

    let body = membership_core::metrics::gather_metrics();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("failed writing health endpoint response: {}", e);
    }
}

/// Waits for a shutdown signal based on the operating system: SIGINT/SIGTERM
/// on Unix, Ctrl+C on Windows.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    #[cfg(windows)]
    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        _ = async { #[cfg(unix)] { sigint.recv().await; } } => {
            info!("SIGINT received");
        },
        _ = async { #[cfg(unix)] { sigterm.recv().await; } } => {
            info!("SIGTERM received");
        },
        _ = async { #[cfg(windows)] { let _ = ctrl_c.await; } } => {
            info!("Ctrl-C received");
        },
    }
}
