//! Host introspection deciding which optional probe groups are eligible
//!
//! Nothing here is fatal. A failed enumeration or a missing binary only
//! narrows what gets attached.

use crate::config::KitOptions;
use crate::Result;
use md5::{Digest, Md5};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// A network interface as seen at build time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetInterface {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
}

impl NetInterface {
    pub fn new(name: impl Into<String>, up: bool, loopback: bool) -> Self {
        Self {
            name: name.into(),
            up,
            loopback,
        }
    }
}

/// Everything the orchestrators need to know about the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostEnvironment {
    pub interfaces: Vec<NetInterface>,
    pub docker_present: bool,
    pub postgres_present: bool,
    pub webapp_present: bool,
}

impl HostEnvironment {
    pub fn detect(options: &KitOptions) -> Self {
        let interfaces = match host_interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Failed to enumerate network interfaces, keeping defaults: {}", e);
                Vec::new()
            }
        };

        Self {
            interfaces,
            docker_present: binary_exists(&options.docker_daemon_path),
            postgres_present: binary_exists(&options.postgresql_path),
            webapp_present: binary_exists(&options.webapp_path),
        }
    }
}

/// List the host interfaces in enumeration order, one entry per name
pub fn host_interfaces() -> Result<Vec<NetInterface>> {
    let addrs = getifaddrs().map_err(std::io::Error::from)?;

    let mut interfaces: Vec<NetInterface> = Vec::new();
    for addr in addrs {
        if interfaces.iter().any(|i| i.name == addr.interface_name) {
            continue;
        }
        interfaces.push(NetInterface {
            up: addr.flags.contains(InterfaceFlags::IFF_UP),
            loopback: addr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            name: addr.interface_name,
        });
    }

    debug!("Found {} network interfaces", interfaces.len());
    Ok(interfaces)
}

/// Pick the first interface that is up, not a loopback, and whose name
/// starts with `prefix`. Falls back to `default` when nothing matches.
///
/// The first match wins, so the result follows the host enumeration order.
pub fn select_interface(candidates: &[NetInterface], default: &str, prefix: &str) -> String {
    candidates
        .iter()
        .filter(|i| !i.loopback && i.up)
        .find(|i| i.name.starts_with(prefix))
        .map(|i| i.name.clone())
        .unwrap_or_else(|| default.to_string())
}

/// Whether `path` names an existing, readable file. Uprobes and the
/// integrity hash both read the binary, so existence alone is not enough.
pub fn binary_exists(path: &Path) -> bool {
    let readable = fs::metadata(path).and_then(|metadata| {
        if !metadata.is_file() {
            return Ok(false);
        }
        fs::File::open(path).map(|_| true)
    });
    match readable {
        Ok(readable) => readable,
        Err(e) => {
            debug!("Binary {} not available: {}", path.display(), e);
            false
        }
    }
}

/// Integrity hash of an executable: the first 8 bytes of its MD5 digest
pub fn exe_hash(path: &Path) -> Result<u64> {
    let content = fs::read(path)?;
    let digest = Md5::digest(&content);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(u64::from_le_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_select_skips_loopback() {
        let ifaces = vec![
            NetInterface::new("lo", true, true),
            NetInterface::new("eth5", true, false),
        ];
        assert_eq!(select_interface(&ifaces, "enp0s3", "e"), "eth5");
    }

    #[test]
    fn test_select_empty_keeps_default() {
        assert_eq!(select_interface(&[], "enp0s3", "e"), "enp0s3");
    }

    #[test]
    fn test_select_skips_down_and_unprefixed() {
        let ifaces = vec![
            NetInterface::new("eth0", false, false),
            NetInterface::new("wlan0", true, false),
            NetInterface::new("ens3", true, false),
            NetInterface::new("eth1", true, false),
        ];
        assert_eq!(select_interface(&ifaces, "enp0s3", "e"), "ens3");
    }

    #[test]
    fn test_select_prefixed_loopback_ignored() {
        let ifaces = vec![NetInterface::new("eth-lo", true, true)];
        assert_eq!(select_interface(&ifaces, "enp0s3", "e"), "enp0s3");
    }

    #[test]
    fn test_binary_exists() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(binary_exists(file.path()));

        let dir = tempfile::tempdir().unwrap();
        assert!(!binary_exists(dir.path()));
        assert!(!binary_exists(&dir.path().join("missing")));
    }

    #[test]
    fn test_binary_exists_requires_read_access() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o000)).unwrap();

        // root ignores file modes
        if fs::File::open(file.path()).is_ok() {
            return;
        }
        assert!(!binary_exists(file.path()));
    }

    #[test]
    fn test_exe_hash_is_stable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x7fELF fake binary").unwrap();

        let first = exe_hash(file.path()).unwrap();
        let second = exe_hash(file.path()).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, 0);
    }
}
