//! Process-supervision side effects.
//!
//! The command interpreter starts, stops and restarts companion services
//! through `supervisorctl`.  The shell-exec lives behind a trait so tests can
//! observe which invocations a command triggered without running anything.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{info, warn};

/// Actions the command interpreter may request from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Run `supervisorctl <action> <service>`.  Returns whether the action
    /// reported success.
    async fn service(&self, action: ServiceAction, service: &str) -> bool;

    /// Promotion hooks for pod mode.  Observable no-ops: the cluster tooling
    /// is expected to watch the log for these transitions.
    fn promote_primary(&self);
    fn promote_secondary(&self);
}

// ---------------------------------------------------------------------------
// supervisorctl-backed implementation
// ---------------------------------------------------------------------------

/// Shells out to `supervisorctl` on the host.
pub struct SupervisorCtl;

#[async_trait]
impl Supervisor for SupervisorCtl {
    async fn service(&self, action: ServiceAction, service: &str) -> bool {
        info!(action = action.as_str(), service, "invoking supervisorctl");
        match tokio::process::Command::new("supervisorctl")
            .arg(action.as_str())
            .arg(service)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(action = action.as_str(), service, error = %e, "supervisorctl failed to run");
                false
            }
        }
    }

    fn promote_primary(&self) {
        info!("promoting this bridge to primary");
    }

    fn promote_secondary(&self) {
        info!("demoting this bridge to secondary");
    }
}

// ---------------------------------------------------------------------------
// Recording test double
// ---------------------------------------------------------------------------

/// Records every invocation instead of shelling out.  Every service action
/// reports success.
#[derive(Default)]
pub struct RecordingSupervisor {
    calls: Mutex<Vec<String>>,
}

impl RecordingSupervisor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    async fn service(&self, action: ServiceAction, service: &str) -> bool {
        self.record(format!("{} {}", action.as_str(), service));
        true
    }

    fn promote_primary(&self) {
        self.record("promote primary".to_owned());
    }

    fn promote_secondary(&self) {
        self.record("promote secondary".to_owned());
    }
}
