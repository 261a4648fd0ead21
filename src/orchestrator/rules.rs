//! Optional probe groups of the main graph
//!
//! Each rule pairs a predicate with the probes it contributes. Rules are
//! evaluated in order and a rule that does not apply only drops its own
//! group.

use super::BuildInputs;
use crate::env::select_interface;
use crate::probe::{NetworkDirection, ProbeSpec};
use tracing::{debug, info};

pub const DOCKER_IMAGE_SYMBOL: &str =
    "github.com/docker/docker/vendor/github.com/docker/distribution/reference.ParseNormalizedNamed";
pub const SQLITE_QUERY_SYMBOL: &str = r"SQLiteConn\).Query";
pub const DB_QUERY_SYMBOL: &str = r"DB\).QueryContext";
pub const LOOPBACK: &str = "lo";

pub struct InclusionRule {
    pub name: &'static str,
    pub applies: fn(&BuildInputs) -> bool,
    pub probes: fn(&BuildInputs) -> Vec<ProbeSpec>,
}

pub const MAIN_RULES: &[InclusionRule] = &[
    InclusionRule {
        name: "docker",
        applies: has_docker,
        probes: docker_probes,
    },
    InclusionRule {
        name: "postgres",
        applies: has_postgres,
        probes: postgres_probes,
    },
    InclusionRule {
        name: "network",
        applies: network_enabled,
        probes: network_probes,
    },
    InclusionRule {
        name: "bpf obfuscation",
        applies: obfuscation_enabled,
        probes: bpf_probes,
    },
    InclusionRule {
        name: "webapp",
        applies: has_webapp,
        probes: webapp_probes,
    },
];

/// Concatenate the groups of every applicable rule, in rule order
pub fn evaluate(rules: &[InclusionRule], inputs: &BuildInputs) -> Vec<ProbeSpec> {
    let mut probes = Vec::new();
    for rule in rules {
        if (rule.applies)(inputs) {
            probes.extend((rule.probes)(inputs));
        } else {
            debug!("Skipping {} probes", rule.name);
        }
    }
    probes
}

fn has_docker(inputs: &BuildInputs) -> bool {
    inputs.host.docker_present
}

fn has_postgres(inputs: &BuildInputs) -> bool {
    inputs.host.postgres_present
}

fn network_enabled(inputs: &BuildInputs) -> bool {
    !inputs.options.disable_network
}

fn obfuscation_enabled(inputs: &BuildInputs) -> bool {
    !inputs.options.disable_bpf_obfuscation
}

fn has_webapp(inputs: &BuildInputs) -> bool {
    inputs.host.webapp_present
}

fn docker_probes(inputs: &BuildInputs) -> Vec<ProbeSpec> {
    vec![ProbeSpec::user(
        "uprobe/ParseNormalizedNamed",
        inputs.options.docker_daemon_path.clone(),
        Some(DOCKER_IMAGE_SYMBOL),
    )]
}

fn postgres_probes(inputs: &BuildInputs) -> Vec<ProbeSpec> {
    let binary = &inputs.options.postgresql_path;
    vec![
        ProbeSpec::user("uprobe/md5_crypt_verify", binary.clone(), None),
        ProbeSpec::user("uprobe/plain_crypt_verify", binary.clone(), None),
    ]
}

fn network_probes(inputs: &BuildInputs) -> Vec<ProbeSpec> {
    let options = &inputs.options;
    let interfaces = &inputs.host.interfaces;
    let ingress = select_interface(interfaces, &options.ingress_ifname, &options.interface_prefix);
    let egress = select_interface(interfaces, &options.egress_ifname, &options.interface_prefix);
    if ingress != options.ingress_ifname || egress != options.egress_ifname {
        info!("adjusted network interfaces to {} (ingress), {} (egress)", ingress, egress);
    }

    vec![
        ProbeSpec::network("xdp/ingress", "ingress", &ingress, NetworkDirection::Ingress),
        ProbeSpec::network("classifier/egress", "egress", &egress, NetworkDirection::Egress),
        ProbeSpec::network("xdp/ingress", "lo-ingress", LOOPBACK, NetworkDirection::Ingress),
        ProbeSpec::network("classifier/egress", "lo-egress", LOOPBACK, NetworkDirection::Egress),
    ]
}

fn bpf_probes(_inputs: &BuildInputs) -> Vec<ProbeSpec> {
    vec![
        ProbeSpec::kernel("kprobe/__x64_sys_bpf"),
        ProbeSpec::kernel("kretprobe/__x64_sys_bpf"),
        ProbeSpec::kernel("kprobe/bpf_prog_kallsyms_add"),
        ProbeSpec::kernel("kprobe/bpf_map_new_fd"),
    ]
}

fn webapp_probes(inputs: &BuildInputs) -> Vec<ProbeSpec> {
    let binary = &inputs.options.webapp_path;
    vec![
        ProbeSpec::user("uprobe/SQLiteConnQuery", binary.clone(), Some(SQLITE_QUERY_SYMBOL)),
        ProbeSpec::user("uprobe/SQLDBQueryContext", binary.clone(), Some(DB_QUERY_SYMBOL)),
    ]
}
