//! Tail-call routing between entry programs and their handlers
//!
//! Each dispatch table is a program array. The entry program looks up an
//! integer action code and jumps into the handler stored at that index.

use crate::maps::catalog::{FA_PROGS, SYS_ENTER_PROGS, TC_PROGS, XDP_PROGS};
use crate::maps::{MapCatalog, MapKind};
use crate::probe::{ProbeId, ProbeSet};
use crate::{KitError, Result};
use ebpfkit_common::{file_action, syscall, tc, xdp};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailCallEdge {
    pub table: String,
    pub key: u32,
    pub target: ProbeId,
}

/// Routes of the ingress dispatch table
pub const INGRESS_ROUTES: &[(u32, &str)] = &[
    (xdp::DISPATCH, "xdp/ingress_dispatch"),
    (xdp::HTTP_ACTION, "xdp/ingress/http_action"),
    (xdp::ADD_FS_WATCH, "xdp/ingress/add_fs_watch"),
    (xdp::DEL_FS_WATCH, "xdp/ingress/del_fs_watch"),
    (xdp::DNS_RESPONSE, "xdp/ingress/handle_dns_resp"),
    (xdp::PUT_PIPE_PROG, "xdp/ingress/put_pipe_prog"),
    (xdp::DEL_PIPE_PROG, "xdp/ingress/del_pipe_prog"),
    (xdp::PUT_DOCKER_IMAGE, "xdp/ingress/put_doc_img"),
    (xdp::DEL_DOCKER_IMAGE, "xdp/ingress/del_doc_img"),
    (xdp::DEL_POSTGRES_ROLE, "xdp/ingress/del_pg_role"),
    (xdp::PUT_POSTGRES_ROLE, "xdp/ingress/put_pg_role"),
    (xdp::GET_NETWORK_DISCOVERY, "xdp/ingress/get_net_dis"),
    (xdp::NETWORK_DISCOVERY_SCAN, "xdp/ingress/get_net_sca"),
    (xdp::ARP_MONITORING, "xdp/ingress/arp_monitoring"),
    (xdp::SYN_LOOP, "xdp/ingress/syn_loop"),
];

pub const EGRESS_ROUTES: &[(u32, &str)] = &[(tc::DISPATCH, "classifier/egress_dispatch")];

pub const SYS_ENTER_ROUTES: &[(u32, &str)] =
    &[(syscall::NEWFSTATAT, "tracepoint/raw_syscalls/newfstatat")];

pub const FILE_ACTION_ROUTES: &[(u32, &str)] = &[
    (file_action::KMSG, "kprobe/fa_kmsg_user"),
    (file_action::FILL_WITH_ZERO, "kprobe/fa_fill_with_zero_user"),
    (file_action::OVERRIDE_CONTENT, "kprobe/fa_override_content_user"),
    (file_action::OVERRIDE_GETDENTS, "kprobe/fa_override_getdents_user"),
];

/// Every dispatch table of the main program set with its routes
pub fn main_route_tables() -> [(&'static str, &'static [(u32, &'static str)]); 4] {
    [
        (XDP_PROGS, INGRESS_ROUTES),
        (TC_PROGS, EGRESS_ROUTES),
        (SYS_ENTER_PROGS, SYS_ENTER_ROUTES),
        (FA_PROGS, FILE_ACTION_ROUTES),
    ]
}

/// Collects edges, rejecting a key routed twice in the same table
#[derive(Debug, Default)]
pub struct DispatchRouter {
    tables: BTreeMap<String, BTreeMap<u32, ProbeId>>,
}

impl DispatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, table: &str, key: u32, target: ProbeId) -> Result<()> {
        let routes = self.tables.entry(table.to_string()).or_default();
        if routes.contains_key(&key) {
            return Err(KitError::DuplicateTailCallKey {
                table: table.to_string(),
                key,
            });
        }
        routes.insert(key, target);
        Ok(())
    }

    pub fn route_all(&mut self, table: &str, routes: &[(u32, &str)]) -> Result<()> {
        for (key, section) in routes {
            self.route(table, *key, ProbeId::new(section))?;
        }
        Ok(())
    }

    /// Check every edge against the probe set and the declared program
    /// arrays, then flatten to the list handed to the loader
    pub fn finish(self, probes: &ProbeSet, maps: &MapCatalog) -> Result<Vec<TailCallEdge>> {
        let mut edges = Vec::new();
        for (table, routes) in self.tables {
            let array = maps.get(&table).filter(|m| m.kind == MapKind::ProgramArray);
            let array = array.ok_or_else(|| {
                KitError::ConfigError(format!("dispatch table {} is not a declared program array", table))
            })?;

            for (key, target) in routes {
                if key >= array.max_entries {
                    return Err(KitError::ConfigError(format!(
                        "dispatch table {} holds {} slots, key {} is out of range",
                        table, array.max_entries, key
                    )));
                }
                if !probes.contains(&target) {
                    return Err(KitError::UnregisteredProbe {
                        table,
                        key,
                        probe: target.to_string(),
                    });
                }
                edges.push(TailCallEdge {
                    table: table.clone(),
                    key,
                    target,
                });
            }
        }
        Ok(edges)
    }
}

/// Tail-call edges of the main program set
pub fn main_routes(probes: &ProbeSet, maps: &MapCatalog) -> Result<Vec<TailCallEdge>> {
    let mut router = DispatchRouter::new();
    for (table, routes) in main_route_tables() {
        router.route_all(table, routes)?;
    }
    router.finish(probes, maps)
}
