//! CLI surface and filesystem inputs.

use clap::Parser;
use std::path::{Path, PathBuf};

/// TCP bridge between the simulation data bus and line-protocol clients.
///
/// Two modes of operation: manikin mode fronts a single patient under the
/// given profile; pod mode registers 1-4 manikins and acts as the
/// instructor bridge.
#[derive(Debug, Parser)]
#[command(name = "bridge", version)]
pub struct Args {
    /// Answer UDP autodiscovery probes.
    #[arg(long = "discovery", default_value_t = true, action = clap::ArgAction::Set)]
    pub discovery: bool,

    /// Autodiscovery port.
    #[arg(long = "discovery_port", default_value_t = 8888)]
    pub discovery_port: u16,

    /// Bridge port.
    #[arg(long = "server_port", default_value_t = 9015)]
    pub server_port: u16,

    /// POD mode.
    #[arg(long = "pod_mode", default_value_t = false, action = clap::ArgAction::Set)]
    pub pod_mode: bool,

    /// Manikin ID (single-patient mode profile, and the routing default).
    #[arg(long = "manikin_id", default_value = "manikin_1")]
    pub manikin_id: String,

    /// Number of manikins to host in pod mode.
    #[arg(long = "manikins", default_value_t = 1)]
    pub manikins: usize,

    /// Identity of this bridge process within a pod cluster.
    #[arg(long = "core_id", default_value = "AMM_000")]
    pub core_id: String,
}

/// Resolved runtime options shared by every component.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub server_port: u16,
    pub pod_mode: bool,
    pub manikin_id: String,
    pub manikins: usize,
    pub core_id: String,
    /// Directory holding the bridge's own module documents.
    pub config_dir: PathBuf,
    /// Directory of per-scenario static client configurations.
    pub static_dir: PathBuf,
    /// Where the remote-session password is persisted.
    pub password_path: PathBuf,
    /// Sentinel file whose presence revokes remote authorization.
    pub remote_block_path: PathBuf,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        BridgeOptions {
            server_port: 9015,
            pod_mode: false,
            manikin_id: "manikin_1".to_owned(),
            manikins: 1,
            core_id: "AMM_000".to_owned(),
            config_dir: PathBuf::from("config"),
            static_dir: PathBuf::from("static/module_configuration_static"),
            password_path: PathBuf::from("/tmp/session_password"),
            remote_block_path: PathBuf::from("/tmp/disabled"),
        }
    }
}

impl BridgeOptions {
    pub fn from_args(args: &Args) -> Self {
        BridgeOptions {
            server_port: args.server_port,
            pod_mode: args.pod_mode,
            manikin_id: args.manikin_id.clone(),
            manikins: args.manikins,
            core_id: args.core_id.clone(),
            ..BridgeOptions::default()
        }
    }

    /// Ids of the manikins this process hosts: `manikin_1..manikin_N` in pod
    /// mode, the configured profile otherwise.
    pub fn manikin_ids(&self) -> Vec<String> {
        if self.pod_mode {
            (1..=self.manikins.max(1))
                .map(|i| format!("manikin_{i}"))
                .collect()
        } else {
            vec![self.manikin_id.clone()]
        }
    }

    /// Routing fallback for messages without a resolvable `mid=`.
    pub fn default_manikin_id(&self) -> &str {
        &self.manikin_id
    }

    pub fn capabilities_schema_path(&self) -> PathBuf {
        self.config_dir.join("tcp_bridge_capabilities.xml")
    }

    pub fn module_configuration_path(&self) -> PathBuf {
        self.config_dir.join("tcp_bridge_configuration.xml")
    }

    pub fn scenario_config_path(&self, scenario: &str, client_type: &str) -> PathBuf {
        self.static_dir
            .join(format!("{scenario}_{client_type}_configuration.xml"))
    }
}

/// Best-effort read of a module document; missing files yield an empty
/// string so startup publications still go out.
pub fn read_module_document(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "module document not readable");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_mode_enumerates_manikins() {
        let options = BridgeOptions {
            pod_mode: true,
            manikins: 3,
            ..BridgeOptions::default()
        };
        assert_eq!(
            options.manikin_ids(),
            vec!["manikin_1", "manikin_2", "manikin_3"]
        );
    }

    #[test]
    fn single_mode_uses_the_configured_profile() {
        let options = BridgeOptions {
            manikin_id: "manikin_2".to_owned(),
            ..BridgeOptions::default()
        };
        assert_eq!(options.manikin_ids(), vec!["manikin_2"]);
        assert_eq!(options.default_manikin_id(), "manikin_2");
    }

    #[test]
    fn scenario_path_is_keyed_by_scenario_and_client_type() {
        let options = BridgeOptions::default();
        assert_eq!(
            options.scenario_config_path("trauma4", "vitals"),
            PathBuf::from("static/module_configuration_static/trauma4_vitals_configuration.xml")
        );
    }

    #[test]
    fn cli_defaults_match_the_documented_surface() {
        let args = Args::parse_from(["bridge"]);
        assert!(args.discovery);
        assert_eq!(args.discovery_port, 8888);
        assert_eq!(args.server_port, 9015);
        assert!(!args.pod_mode);
        assert_eq!(args.manikin_id, "manikin_1");
        assert_eq!(args.manikins, 1);
        assert_eq!(args.core_id, "AMM_000");
    }

    #[test]
    fn cli_accepts_pod_mode_flags() {
        let args = Args::parse_from([
            "bridge",
            "--pod_mode",
            "true",
            "--manikins",
            "4",
            "--server_port",
            "9016",
            "--discovery",
            "false",
        ]);
        assert!(args.pod_mode);
        assert_eq!(args.manikins, 4);
        assert_eq!(args.server_port, 9016);
        assert!(!args.discovery);
    }
}
