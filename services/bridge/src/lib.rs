// bridge: demultiplexes simulation-bus traffic onto per-client TCP
// subscription sets and mints bus events from client commands.

pub mod capability;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod events;
pub mod hub;
pub mod labs;
pub mod manikin;
pub mod net;
pub mod parser;
pub mod pod;
pub mod registry;
pub mod subscriptions;
pub mod supervisor;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sim_bus::Broker;

use crate::config::BridgeOptions;
use crate::hub::Hub;
use crate::supervisor::Supervisor;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("could not bind bridge port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },
}

/// A running bridge: manikins joined to the bus, listener accepting
/// sessions.
pub struct Bridge {
    hub: Arc<Hub>,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
}

impl Bridge {
    /// Initialize the pod, announce the bridge on the bus, bind the
    /// listener and start accepting sessions.
    pub async fn start(
        options: BridgeOptions,
        broker: Arc<Broker>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Result<Bridge, BridgeError> {
        let server_port = options.server_port;
        let hub = Hub::initialize(options, &broker, supervisor).await;

        for manikin in hub.pod.manikins() {
            manikin.publish_operational_description();
            manikin.publish_configuration();
        }

        let listener = net::server::bind_listener(server_port).map_err(|source| {
            BridgeError::Bind {
                port: server_port,
                source,
            }
        })?;
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            port: server_port,
            source,
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        tokio::spawn(net::server::run_accept_loop(
            listener,
            Arc::clone(&hub),
            Arc::clone(&stop),
        ));

        Ok(Bridge {
            hub,
            local_addr,
            stop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Ask the accept loop to exit at its next poll tick.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
