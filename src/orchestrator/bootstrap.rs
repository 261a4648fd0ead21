//! Self-protection probes loaded before the main payload

use super::{BuildInputs, GraphKind, ProbeGraph};
use crate::maps::MapCatalog;
use crate::options::bootstrap_options;
use crate::probe::{ProbeSet, ProbeSpec};
use crate::Result;
use tracing::debug;

pub const BOOTSTRAP_SECTIONS: &[&str] = &[
    "kprobe/__x64_sys_signal",
    "kprobe/__x64_sys_kill",
    "kprobe/__x64_sys_finit_module",
    "kprobe/__x64_sys_unlink",
    "kprobe/__x64_sys_unlinkat",
    "kretprobe/__x64_sys_open",
    "kretprobe/__x64_sys_openat",
    "kprobe/vfs_open",
    "kprobe/vfs_getattr",
    "kretprobe/__x64_sys_stat",
    "kretprobe/__x64_sys_lstat",
    "kretprobe/__x64_sys_newlstat",
    "kretprobe/__x64_sys_fstat",
    "kretprobe/vfs_read",
    "kprobe/__x64_sys_read",
    "kretprobe/__x64_sys_read",
    "kprobe/__x64_sys_getdents64",
];

pub const BOOTSTRAP_GETDENTS_UID: &str = "BootstrapGetdents";

pub fn build_bootstrap(inputs: &BuildInputs) -> Result<ProbeGraph> {
    let mut probes = ProbeSet::new();
    probes.extend(BOOTSTRAP_SECTIONS.iter().map(|s| ProbeSpec::kernel(s)))?;
    probes.insert(
        ProbeSpec::kernel("kretprobe/__x64_sys_getdents64").with_uid(BOOTSTRAP_GETDENTS_UID),
    )?;

    debug!("Bootstrap graph: {} probes", probes.len());

    Ok(ProbeGraph {
        kind: GraphKind::Bootstrap,
        probes,
        maps: MapCatalog::new(),
        routes: Vec::new(),
        options: bootstrap_options(inputs.pid, inputs.exe_hash),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KitOptions;
    use crate::env::HostEnvironment;
    use crate::options::{HASH_CONSTANT, PID_CONSTANT};
    use crate::probe::{Attach, ProbeId};

    fn inputs() -> BuildInputs {
        BuildInputs {
            options: KitOptions::default(),
            host: HostEnvironment {
                interfaces: Vec::new(),
                docker_present: true,
                postgres_present: true,
                webapp_present: true,
            },
            pid: 4242,
            exe_hash: 0x0102_0304_0506_0708,
        }
    }

    #[test]
    fn test_fixed_probe_set() {
        let graph = build_bootstrap(&inputs()).unwrap();
        assert_eq!(graph.kind, GraphKind::Bootstrap);
        assert_eq!(graph.probes.len(), 18);
        assert!(graph.probes.iter().all(|p| p.attach == Attach::Kernel));
        assert!(graph.probes.contains(&ProbeId {
            section: "kretprobe/__x64_sys_getdents64".to_string(),
            uid: Some(BOOTSTRAP_GETDENTS_UID.to_string()),
        }));
    }

    #[test]
    fn test_no_tables_or_routes() {
        let graph = build_bootstrap(&inputs()).unwrap();
        assert!(graph.maps.is_empty());
        assert!(graph.routes.is_empty());
    }

    #[test]
    fn test_binds_pid_and_hash() {
        let graph = build_bootstrap(&inputs()).unwrap();
        assert_eq!(graph.options.constant(PID_CONSTANT), Some(4242));
        assert_eq!(
            graph.options.constant(HASH_CONSTANT),
            Some(0x0102_0304_0506_0708)
        );
    }

    #[test]
    fn test_host_does_not_change_bootstrap() {
        let mut bare = inputs();
        bare.host.docker_present = false;
        bare.options.disable_network = true;
        let a = build_bootstrap(&inputs()).unwrap();
        let b = build_bootstrap(&bare).unwrap();
        assert_eq!(a.probes, b.probes);
    }
}
