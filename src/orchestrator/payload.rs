//! The main probe graph: fixed probes, dispatch targets, optional groups

use super::rules::{evaluate, MAIN_RULES};
use super::{BuildInputs, GraphKind, ProbeGraph};
use crate::maps::catalog::main_catalog;
use crate::options::main_options;
use crate::probe::{ProbeSet, ProbeSpec};
use crate::router::{main_route_tables, main_routes};
use crate::Result;
use tracing::{debug, info};

pub const MAIN_SECTIONS: &[&str] = &[
    "kprobe/do_exit",
    "kprobe/__x64_sys_pipe",
    "kprobe/__x64_sys_pipe2",
    "kretprobe/__x64_sys_pipe",
    "kretprobe/__x64_sys_pipe2",
    "kprobe/__x64_sys_dup2",
    "kprobe/__x64_sys_dup3",
    "tracepoint/sched/sched_process_fork",
    "kprobe/security_bprm_committed_creds",
    "kprobe/__x64_sys_open",
    "kretprobe/__x64_sys_open",
    "kprobe/__x64_sys_openat",
    "kretprobe/__x64_sys_openat",
    "kprobe/__x64_sys_read",
    "kretprobe/__x64_sys_read",
    "kprobe/__x64_sys_close",
    "tracepoint/raw_syscalls/sys_enter",
    "tracepoint/raw_syscalls/sys_exit",
];

pub const MAIN_GETDENTS_UID: &str = "MainGetdents";

/// Dispatch targets, registered once each even when several tables share one
fn tail_call_targets() -> Vec<ProbeSpec> {
    let mut targets: Vec<ProbeSpec> = Vec::new();
    for (_, routes) in main_route_tables() {
        for (_, section) in routes.iter() {
            if !targets.iter().any(|t| t.section() == *section) {
                targets.push(ProbeSpec::tail_call(section));
            }
        }
    }
    targets
}

pub fn build_main(inputs: &BuildInputs) -> Result<ProbeGraph> {
    let mut probes = ProbeSet::new();
    probes.extend(MAIN_SECTIONS.iter().map(|s| ProbeSpec::kernel(s)))?;
    probes.insert(ProbeSpec::kernel("kretprobe/__x64_sys_getdents64").with_uid(MAIN_GETDENTS_UID))?;
    probes.extend(tail_call_targets())?;
    probes.extend(evaluate(MAIN_RULES, inputs))?;

    let maps = main_catalog()?;
    maps.validate()?;
    let routes = main_routes(&probes, &maps)?;

    debug!(
        "Main graph: {} probes, {} maps, {} tail calls",
        probes.len(),
        maps.len(),
        routes.len()
    );
    info!(
        "Main graph targets HTTP port {}",
        inputs.options.target_http_server_port
    );

    Ok(ProbeGraph {
        kind: GraphKind::Main,
        probes,
        maps,
        routes,
        options: main_options(inputs.options.target_http_server_port, inputs.pid),
    })
}
