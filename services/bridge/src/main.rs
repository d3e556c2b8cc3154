// bridge: TCP bridge between the simulation data bus and line-protocol
// clients (simulators, instructor consoles, physiology viewers).

use std::sync::Arc;

use clap::Parser;
use sim_bus::Broker;
use tracing::info;

use bridge::config::{Args, BridgeOptions};
use bridge::supervisor::{Supervisor, SupervisorCtl};
use bridge::{Bridge, discovery};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "=== [AMM - TCP Bridge] ===");

    let options = BridgeOptions::from_args(&args);
    let broker = Broker::new();
    let supervisor: Arc<dyn Supervisor> = Arc::new(SupervisorCtl);

    let bridge = match Bridge::start(options, Arc::clone(&broker), supervisor).await {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    if args.discovery {
        match discovery::bind_discovery(args.discovery_port).await {
            Ok(socket) => {
                tokio::spawn(discovery::run_discovery(
                    socket,
                    args.core_id.clone(),
                    args.server_port,
                ));
            }
            Err(e) => {
                eprintln!("FATAL: could not bind discovery port {}: {e}", args.discovery_port);
                std::process::exit(1);
            }
        }
    } else {
        info!("UDP discovery not started due to command line option");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("FATAL: could not listen for shutdown signal: {e}");
        std::process::exit(1);
    }

    info!("bridge shutting down");
    bridge.shutdown();
    broker.shutdown();
}
