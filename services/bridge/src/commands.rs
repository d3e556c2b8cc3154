//! The `[SYS]` command interpreter.
//!
//! Commands arrive on the bus — minted by clients through `ACT=` lines or by
//! other bridge components — and either drive the simulation lifecycle,
//! manage companion services through the injected supervisor, or maintain
//! the connection-record table.  Anything that is not a `[SYS]` command is
//! relayed to every session as an `ACT=` line.

use sim_bus::ControlType;
use tracing::{debug, info, trace, warn};

use crate::manikin::{Manikin, SimStatus};
use crate::parser;
use crate::registry::ClientStatus;
use crate::supervisor::ServiceAction;

const SYS_PREFIX: &str = "[SYS]";

/// The WebRTC remote-access companion service.
const RTC_SERVICE: &str = "amm_rtc_bridge";

pub async fn handle_command(manikin: &Manikin, message: &str) {
    info!(manikin = %manikin.id(), message, "command received");
    match message.strip_prefix(SYS_PREFIX) {
        Some(value) => handle_sys_command(manikin, message, value).await,
        None => {
            debug!(manikin = %manikin.id(), "relaying non-system command");
            echo_act(manikin, message).await;
        }
    }
}

async fn handle_sys_command(manikin: &Manikin, message: &str, value: &str) {
    let mid = parser::extract_mid(value).unwrap_or_default();
    // Service management is only honoured when addressed to this process's
    // parent id, or when running outside a pod.
    let addressed_here = !manikin.options().pod_mode || mid == manikin.options().core_id;

    if value.contains("START_SIM") {
        manikin.set_sim_status(SimStatus::Running, false);
        manikin.publish_simulation_control(ControlType::Run);
        announce(manikin, "START_SIM").await;
    } else if value.contains("STOP_SIM") {
        manikin.set_sim_status(SimStatus::NotRunning, false);
        manikin.publish_simulation_control(ControlType::Halt);
        announce(manikin, "STOP_SIM").await;
    } else if value.contains("PAUSE_SIM") {
        manikin.set_sim_status(SimStatus::Paused, true);
        manikin.publish_simulation_control(ControlType::Halt);
        announce(manikin, "PAUSE_SIM").await;
    } else if value.contains("RESET_SIM") {
        manikin.set_sim_status(SimStatus::NotRunning, false);
        announce(manikin, "RESET_SIM").await;
        manikin.publish_simulation_control(ControlType::Reset);
        manikin.reset_labs();
    } else if value.contains("RESTART_SERVICE") {
        if addressed_here {
            restart_services(manikin, value, &mid).await;
        } else {
            trace!(manikin = %manikin.id(), "restart command not addressed here");
        }
    } else if value.contains("START_SERVICE") {
        if addressed_here {
            let service = extract_service(value).unwrap_or_default();
            info!(service, "command to start service");
            if service.contains("all") {
                promote(manikin, &mid);
            } else {
                manikin
                    .supervisor()
                    .service(ServiceAction::Start, &service)
                    .await;
            }
        }
    } else if value.contains("STOP_SERVICE") {
        if addressed_here {
            let service = extract_service(value).unwrap_or_default();
            info!(service, "command to stop service");
            manikin
                .supervisor()
                .service(ServiceAction::Stop, &service)
                .await;
        }
    } else if value.contains("DISABLE_REMOTE") {
        info!("request to disable remote access");
        if manikin
            .supervisor()
            .service(ServiceAction::Stop, RTC_SERVICE)
            .await
        {
            manikin.registry().broadcast("REMOTE=DISABLED\n").await;
        }
    } else if value.contains("SET_PRIMARY") {
        promote(manikin, &mid);
    } else if value.contains("END_SIMULATION") {
        manikin.set_sim_status(SimStatus::NotRunning, true);
        manikin.publish_simulation_control(ControlType::Halt);
        announce(manikin, "END_SIMULATION_SIM").await;
    } else if value.contains("ENABLE_REMOTE") {
        enable_remote(manikin, value).await;
    } else if value.contains("UPDATE_CLIENT") {
        update_client(manikin, message, value).await;
    } else if value.contains("KICK") {
        let target = value
            .strip_prefix("KICK")
            .unwrap_or_default()
            .trim_start_matches([' ', '=']);
        info!(target, "kick requested over the bus");
        if manikin.records().remove(target) {
            info!(target, "connection record removed");
        }
    } else if let Some(scenario) = value.strip_prefix("LOAD_SCENARIO:") {
        debug!(scenario, "setting scenario");
        manikin.set_scenario(scenario);
        manikin.send_scenario_config_to_all(scenario).await;
        echo_act(manikin, message).await;
    } else if let Some(state) = value.strip_prefix("LOAD_STATE:") {
        debug!(state, "setting state");
        manikin.set_state(state);
        echo_act(manikin, message).await;
    } else {
        warn!(manikin = %manikin.id(), message, "unknown system command, relaying");
        echo_act(manikin, message).await;
    }
}

/// `ACT=<name>;mid=<id>` to every session.
async fn announce(manikin: &Manikin, action: &str) {
    manikin
        .registry()
        .broadcast(&format!("ACT={action};mid={}\n", manikin.id()))
        .await;
}

/// `ACT=<original message>;mid=<id>` to every session.
async fn echo_act(manikin: &Manikin, message: &str) {
    manikin
        .registry()
        .broadcast(&format!("ACT={message};mid={}\n", manikin.id()))
        .await;
}

/// Promote toward whichever role the addressing implies.
fn promote(manikin: &Manikin, mid: &str) {
    if mid == manikin.options().core_id {
        manikin.supervisor().promote_primary();
    } else {
        manikin.supervisor().promote_secondary();
    }
}

async fn restart_services(manikin: &Manikin, value: &str, mid: &str) {
    let service = extract_service(value).unwrap_or_default();
    info!(service, "command to restart service");
    if service.contains("all") {
        if manikin.options().pod_mode {
            promote(manikin, mid);
        } else {
            manikin
                .supervisor()
                .service(ServiceAction::Restart, &service)
                .await;
        }
    } else {
        manikin
            .supervisor()
            .service(ServiceAction::Restart, &service)
            .await;
    }
}

async fn enable_remote(manikin: &Manikin, value: &str) {
    let data = value
        .strip_prefix("ENABLE_REMOTE")
        .unwrap_or_default()
        .trim_start();
    let kvp = parser::parse_kvp(data);
    let Some(password) = kvp.get("password") else {
        warn!("no password supplied, ignoring remote enable");
        return;
    };
    info!("enabling remote access");
    persist_password(manikin, password);

    if manikin.options().remote_block_path.exists() {
        warn!("core not authorized for remote access");
        manikin
            .supervisor()
            .service(ServiceAction::Stop, RTC_SERVICE)
            .await;
        manikin.registry().broadcast("REMOTE=REJECTED\n").await;
        return;
    }

    let ok = manikin
        .supervisor()
        .service(ServiceAction::Restart, RTC_SERVICE)
        .await;
    let line = if ok { "REMOTE=ENABLED\n" } else { "REMOTE=DISABLED\n" };
    manikin.registry().broadcast(line).await;
}

fn persist_password(manikin: &Manikin, password: &str) {
    let path = &manikin.options().password_path;
    if let Err(e) = std::fs::write(path, password) {
        warn!(path = %path.display(), error = %e, "could not persist session password");
    }
}

async fn update_client(manikin: &Manikin, message: &str, value: &str) {
    let data = value
        .strip_prefix("UPDATE_CLIENT")
        .unwrap_or_default()
        .trim_start_matches(['=', ' ']);
    let kvp = parser::parse_kvp(data);
    let Some(client_id) = kvp.get("client_id") else {
        warn!("client update without client_id, ignoring");
        return;
    };

    let record = manikin.records().update(client_id, |record| {
        if let Some(name) = kvp.get("client_name") {
            record.client_name = name.clone();
        }
        if let Some(learner) = kvp.get("learner_name") {
            record.learner_name = learner.clone();
        }
        if let Some(connection) = kvp.get("client_connection") {
            record.client_connection = connection.clone();
        }
        if let Some(client_type) = kvp.get("client_type") {
            record.client_type = client_type.clone();
        }
        if let Some(role) = kvp.get("role") {
            record.role = role.clone();
        }
        if let Some(time) = kvp.get("connect_time") {
            if let Ok(time) = time.parse() {
                record.connect_time = time;
            }
        }
        if let Some(status) = kvp.get("client_status") {
            record.client_status = if status == "DISCONNECTED" {
                ClientStatus::Disconnected
            } else {
                ClientStatus::Connected
            };
        }
    });

    // A disconnect announcement completes its bookkeeping here: once the
    // departed session's update has made the round trip, the record goes.
    if record.client_status == ClientStatus::Disconnected
        && !manikin.registry().contains(client_id)
    {
        manikin.records().remove(client_id);
        debug!(client = %client_id, "retired disconnected connection record");
    }

    echo_act(manikin, message).await;
}

fn extract_service(value: &str) -> Option<String> {
    let rest = &value[value.find("service=")? + "service=".len()..];
    Some(match rest.find(';') {
        Some(end) => rest[..end].to_owned(),
        None => rest.to_owned(),
    })
}
