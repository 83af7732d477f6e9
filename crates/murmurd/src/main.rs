//! Murmur Daemon - gossip group membership
//!
//! Usage:
//!   # Emulated group with one crash
//!   murmurd simulate --nodes 10 --fail-nodes 3 --fail-at 100
//!
//!   # Lossy network, JSON report
//!   murmurd simulate --drop-rate 0.1 --seed 42 --json
//!
//!   # Introducer node over UDP
//!   murmurd run --bind 127.0.0.1:7946
//!
//!   # Joining node
//!   murmurd run --bind 127.0.0.1:7947 --introducer 127.0.0.1:7946 --tick-ms 500

use clap::Parser;
use murmur_membership::init_metrics;
use murmurd::{Cli, Command, RunArgs, SimulateArgs, Simulation, SimulationConfig, UdpNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing with configured log level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    init_metrics(cli.metrics_addr);

    match cli.command {
        Command::Simulate(args) => simulate(&args),
        Command::Run(args) => run(&args).await,
    }
}

fn simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let report = Simulation::new(SimulationConfig::from(args)).run();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let node = UdpNode::bind(
        args.bind,
        args.membership_config(),
        args.tick_interval(),
        args.protocol.join_retry_ticks,
    )
    .await?;

    let outcome = node.run(wait_for_shutdown_signal()).await?;
    tracing::info!(
        ticks = outcome.ticks,
        state = %outcome.state,
        members = outcome.members.len(),
        "Goodbye!"
    );
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
