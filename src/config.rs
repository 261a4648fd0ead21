//! Runtime configuration shared by the `ebpfkit` CLI and the agent

use crate::{KitError, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HTTP_SERVER_PORT: u16 = 8000;
pub const DEFAULT_IFNAME: &str = "enp0s3";
pub const DEFAULT_INTERFACE_PREFIX: &str = "e";
pub const DEFAULT_DOCKER_DAEMON_PATH: &str = "/usr/bin/dockerd";
pub const DEFAULT_POSTGRESQL_PATH: &str = "/usr/lib/postgresql/12/bin/postgres";
pub const DEFAULT_WEBAPP_PATH: &str = "/root/webapp";

#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitOptions {
    #[arg(long, default_value_t = DEFAULT_HTTP_SERVER_PORT, help = "Port of the targeted HTTP server")]
    pub target_http_server_port: u16,

    #[arg(long, default_value = DEFAULT_IFNAME, help = "Ingress interface, used when auto-selection finds nothing")]
    pub ingress_ifname: String,

    #[arg(long, default_value = DEFAULT_IFNAME, help = "Egress interface, used when auto-selection finds nothing")]
    pub egress_ifname: String,

    #[arg(long, default_value = DEFAULT_INTERFACE_PREFIX, help = "Name prefix of physical interfaces")]
    pub interface_prefix: String,

    #[arg(long, default_value = DEFAULT_DOCKER_DAEMON_PATH, help = "Path to the Docker daemon binary")]
    pub docker_daemon_path: PathBuf,

    #[arg(long, default_value = DEFAULT_POSTGRESQL_PATH, help = "Path to the PostgreSQL server binary")]
    pub postgresql_path: PathBuf,

    #[arg(long, default_value = DEFAULT_WEBAPP_PATH, help = "Path to the targeted web application binary")]
    pub webapp_path: PathBuf,

    #[arg(long, help = "Do not attach network probes")]
    pub disable_network: bool,

    #[arg(long, help = "Do not hide loaded programs and maps")]
    pub disable_bpf_obfuscation: bool,
}

impl Default for KitOptions {
    fn default() -> Self {
        Self {
            target_http_server_port: DEFAULT_HTTP_SERVER_PORT,
            ingress_ifname: DEFAULT_IFNAME.to_string(),
            egress_ifname: DEFAULT_IFNAME.to_string(),
            interface_prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
            docker_daemon_path: PathBuf::from(DEFAULT_DOCKER_DAEMON_PATH),
            postgresql_path: PathBuf::from(DEFAULT_POSTGRESQL_PATH),
            webapp_path: PathBuf::from(DEFAULT_WEBAPP_PATH),
            disable_network: false,
            disable_bpf_obfuscation: false,
        }
    }
}

impl KitOptions {
    /// Load options from a YAML file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let options: KitOptions = serde_yaml::from_str(&raw)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingress_ifname.is_empty() || self.egress_ifname.is_empty() {
            return Err(KitError::ConfigError(
                "interface names must not be empty".to_string(),
            ));
        }
        if self.target_http_server_port == 0 {
            return Err(KitError::ConfigError(
                "target HTTP server port must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pick the YAML file when given, the command line flags otherwise
pub fn resolve(flags: KitOptions, file: Option<&Path>) -> Result<KitOptions> {
    match file {
        Some(path) => KitOptions::from_file(path),
        None => {
            flags.validate()?;
            Ok(flags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "target_http_server_port: 9000\ndisable_network: true").unwrap();

        let options = KitOptions::from_file(file.path()).unwrap();
        assert_eq!(options.target_http_server_port, 9000);
        assert!(options.disable_network);
        assert_eq!(options.ingress_ifname, DEFAULT_IFNAME);
        assert_eq!(options.webapp_path, PathBuf::from(DEFAULT_WEBAPP_PATH));
    }

    #[test]
    fn test_empty_ifname_rejected() {
        let options = KitOptions {
            egress_ifname: String::new(),
            ..KitOptions::default()
        };
        assert!(matches!(options.validate(), Err(KitError::ConfigError(_))));
    }
}
