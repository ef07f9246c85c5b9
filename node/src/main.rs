// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Devnet Node
//!
//! Entry point for the `strata-node` binary. Parses CLI arguments and the
//! TOML configuration, initializes logging and metrics, then runs a local
//! multi-validator devnet on the consensus core.
//!
//! Subcommands:
//!
//! - `run`: start the devnet
//! - `version`: print build version information

mod cli;
mod config;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinHandle;

use strata_protocol::config::{DEVNET_TRANSFER_GAS, PROTOCOL_VERSION};
use strata_protocol::consensus::EventSink;
use strata_protocol::devnet::{Devnet, DevnetConfig, NodeOptions};
use strata_protocol::types::{Address, Transaction};

use cli::{Commands, RunArgs, StrataNodeCli};
use config::NodeConfig;
use metrics::NodeMetrics;

/// Funded account that signs the demo transfers.
const FAUCET: Address = Address([0xFA; 20]);
const FAUCET_BALANCE: u64 = 1_000_000_000;
const DEMO_TRANSFER_AMOUNT: u64 = 1_000;

/// How often the run loop checks progress.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrataNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the devnet and the metrics endpoint, then waits for the target
/// height or a shutdown signal.
async fn run_node(args: RunArgs) -> Result<()> {
    let config = NodeConfig::resolve(&args)?;
    logging::init_logging(
        &config.logging.level,
        &config.logging.components,
        config.logging.format,
    )?;

    tracing::info!(
        validators = config.validators,
        offline = ?config.offline,
        heights = config.heights,
        pos_out_time = config.timing.pos_out_time,
        "starting strata-node"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let metrics_server = if config.metrics.enabled {
        Some(serve_metrics(&config.metrics.listen_addr, Arc::clone(&node_metrics)).await?)
    } else {
        None
    };

    // --- Devnet ---
    let mut devnet = Devnet::new(DevnetConfig {
        validators: config.validators,
        stake: config.stake,
        time_config: config.timing,
        node: NodeOptions {
            verifier: config.verifier,
            ..NodeOptions::default()
        },
        balances: vec![(FAUCET, FAUCET_BALANCE)],
        genesis_time: None,
    });
    for nonce in 0..config.transfers {
        devnet.pool().submit(Transaction {
            from: FAUCET,
            to: demo_recipient(nonce),
            amount: DEMO_TRANSFER_AMOUNT,
            nonce,
            gas: DEVNET_TRANSFER_GAS,
        });
    }
    let observer: Arc<dyn EventSink> = node_metrics.clone();
    devnet.spawn_all(&config.offline, Some(observer));

    // --- Progress ---
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let heights = devnet.running_heights();
                let lowest = heights.iter().copied().min().unwrap_or(0);
                tracing::debug!(?heights, pending = devnet.pool().pending_len(), "devnet progress");
                if config.heights > 0 && lowest >= config.heights {
                    tracing::info!(height = lowest, "target height reached on every validator");
                    break;
                }
            }
        }
    }

    let heights = devnet.running_heights();
    tracing::info!(
        ?heights,
        finalized = node_metrics.heights_finalized_total.get(),
        reelections = node_metrics.reelections_total.get(),
        state_failures = node_metrics.state_failures_total.get(),
        "stopping devnet"
    );
    devnet.shutdown().await;
    if let Some(server) = metrics_server {
        server.abort();
    }
    tracing::info!("strata-node stopped");
    Ok(())
}

/// Binds the metrics listener and serves it on a background task.
async fn serve_metrics(addr: &str, metrics: Arc<NodeMetrics>) -> Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics server listening");
    let router = metrics::router(metrics);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "metrics server error");
        }
    }))
}

fn demo_recipient(nonce: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[..8].copy_from_slice(&nonce.to_be_bytes());
    bytes[19] = 0x01;
    Address(bytes)
}

fn print_version() {
    println!("strata-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", PROTOCOL_VERSION);
    println!("rustc       {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
