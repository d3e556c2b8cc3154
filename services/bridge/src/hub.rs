//! Shared state wired once per process: the session registry, the
//! connection-record table and the pod of manikins.

use std::sync::Arc;
use tracing::info;

use sim_bus::Broker;

use crate::config::BridgeOptions;
use crate::pod::Pod;
use crate::registry::{ConnectionTable, SessionRegistry};
use crate::supervisor::Supervisor;

pub struct Hub {
    pub options: BridgeOptions,
    pub registry: Arc<SessionRegistry>,
    pub records: Arc<ConnectionTable>,
    pub pod: Pod,
}

impl Hub {
    pub async fn initialize(
        options: BridgeOptions,
        broker: &Arc<Broker>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Arc<Hub> {
        let registry = Arc::new(SessionRegistry::new());
        let records = Arc::new(ConnectionTable::new());
        let pod = Pod::initialize(&options, broker, &registry, &records, &supervisor).await;
        Arc::new(Hub {
            options,
            registry,
            records,
            pod,
        })
    }

    /// Tear down a session everywhere.  Idempotent: only the caller that
    /// actually removes the registry entry runs the rest of the cleanup.
    pub async fn remove_session(&self, session_id: &str) {
        if !self.registry.remove(session_id) {
            return;
        }
        for manikin in self.pod.manikins() {
            manikin.forget_session(session_id);
        }
        if let Some(record) = self.records.mark_disconnected(session_id) {
            // Announce the departure on the bus; the command's round trip
            // retires the record (see the UPDATE_CLIENT handler).
            self.pod
                .default_manikin()
                .publish_command_message(record.to_sys_update());
        }
        info!(session = session_id, "session cleaned up");
    }
}
