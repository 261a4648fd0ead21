//! aya-backed loader and lifecycle of the loaded objects

use crate::symbols;
use anyhow::anyhow;
use aya::maps::{Array, HashMap, MapData, ProgramArray};
use aya::programs::{
    tc, KProbe, Program, SchedClassifier, TcAttachType, TracePoint, UProbe, Xdp, XdpFlags,
};
use aya::{Ebpf, EbpfLoader, Pod};
use ebpfkit::loader::{LoadHandle, Loader};
use ebpfkit::maps::{MapKind, MapSpec};
use ebpfkit::options::{LoadOptions, MemlockLimit};
use ebpfkit::orchestrator::ProbeGraph;
use ebpfkit::probe::{Attach, NetworkDirection, ProbeSpec};
use ebpfkit::{KitError, Result};
use ebpfkit_common::{
    CommPair, CommProgram, FsWatchKey, HttpRoute, ImageOverride, ImageOverrideKey, PipedProgram,
    RawPacket, DNS_NAME_LEN, HTTP_RESP_PATTERN_LEN, HTTP_ROUTE_KEY_LEN, POSTGRES_MD5_LEN,
    POSTGRES_ROLE_LEN, QUERY_PATTERN_LEN,
};
use log::{debug, info, warn};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

/// Loads a graph from one compiled object file
pub struct AyaLoader {
    object: PathBuf,
}

impl AyaLoader {
    pub fn new(object: impl Into<PathBuf>) -> Self {
        Self {
            object: object.into(),
        }
    }
}

/// Everything a loaded graph holds on to. Dropping it detaches every link
/// and closes every program and table.
pub struct AyaHandle {
    bpf: Ebpf,
    dispatch: Vec<ProgramArray<MapData>>,
}

impl LoadHandle for AyaHandle {
    fn release(self) -> Result<()> {
        info!(
            "Releasing {} programs and {} dispatch tables",
            self.bpf.programs().count(),
            self.dispatch.len()
        );
        drop(self.dispatch);
        drop(self.bpf);
        Ok(())
    }
}

impl Loader for AyaLoader {
    type Handle = AyaHandle;

    fn load(&mut self, graph: &ProbeGraph) -> Result<AyaHandle> {
        info!("Loading {} graph from {}", graph.kind, self.object.display());

        raise_memlock(&graph.options.memlock);
        let mut bpf = open_object(&self.object, &graph.options)?;

        for map in graph.maps.iter().filter(|m| m.is_seeded()) {
            seed_map(&mut bpf, map)?;
        }

        for name in graph.probes.program_names() {
            load_program(&mut bpf, &name)?;
        }

        let mut dispatch = Vec::new();
        for map in graph.maps.iter().filter(|m| m.kind == MapKind::ProgramArray) {
            dispatch.push(fill_dispatch_table(&mut bpf, graph, map)?);
        }

        for probe in graph.probes.iter() {
            attach_probe(&mut bpf, probe)?;
        }

        info!(
            "{} graph loaded: {} probes, {} tail calls",
            graph.kind,
            graph.probes.len(),
            graph.routes.len()
        );
        Ok(AyaHandle { bpf, dispatch })
    }
}

fn load_failed(what: impl std::fmt::Display, e: impl std::fmt::Display) -> KitError {
    KitError::ProgramLoadFailed(format!("{}: {}", what, e))
}

fn attach_failed(what: impl std::fmt::Display, e: impl std::fmt::Display) -> KitError {
    KitError::AttachFailed(format!("{}: {}", what, e))
}

/// Memlock failures are not fatal; map creation reports the real error
fn raise_memlock(limit: &MemlockLimit) {
    let rlim = libc::rlimit {
        rlim_cur: limit.cur as libc::rlim_t,
        rlim_max: limit.max as libc::rlim_t,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!(
            "Failed to raise memlock limit: {}",
            io::Error::last_os_error()
        );
    }
}

fn open_object(object: &Path, options: &LoadOptions) -> Result<Ebpf> {
    if options.kprobe_max_active > 0 {
        debug!(
            "kretprobe maxactive {} and verifier log size {} are left to kernel defaults",
            options.kprobe_max_active, options.verifier_log_size
        );
    }

    let mut loader = EbpfLoader::new();
    for constant in &options.constants {
        debug!("Setting constant {} = {}", constant.name, constant.value);
        loader.set_global(constant.name.as_str(), &constant.value, false);
    }
    loader
        .load_file(object)
        .map_err(|e| load_failed(object.display(), e))
}

type Seeder = fn(&mut Ebpf, &MapSpec) -> Result<()>;

/// Typed writer of each table that carries load-time entries. aya checks
/// the key and value widths against the table declared in the object.
fn seeder(table: &str) -> Option<Seeder> {
    let seeder: Seeder = match table {
        "http_resp_pattern" => seed_hash::<[u8; HTTP_RESP_PATTERN_LEN], u8>,
        "comm_prog_key" => seed_hash::<CommPair, CommProgram>,
        "piped_progs" => seed_hash::<u32, PipedProgram>,
        "image_override" => seed_hash::<ImageOverrideKey, ImageOverride>,
        "dedicated_watch_keys" => seed_array::<FsWatchKey>,
        "postgres_roles" => seed_hash::<[u8; POSTGRES_ROLE_LEN], [u8; POSTGRES_MD5_LEN]>,
        "dns_table" => seed_hash::<[u8; DNS_NAME_LEN], [u8; 4]>,
        "http_routes" => seed_hash::<[u8; HTTP_ROUTE_KEY_LEN], HttpRoute>,
        "raw_packets" => seed_array::<RawPacket>,
        "query_override_pattern" => {
            seed_hash::<[u8; QUERY_PATTERN_LEN], [u8; QUERY_PATTERN_LEN]>
        }
        _ => return None,
    };
    Some(seeder)
}

/// Write the pre-seeded entries of `spec`. The table stays owned by `bpf`.
fn seed_map(bpf: &mut Ebpf, spec: &MapSpec) -> Result<()> {
    let seed = seeder(&spec.name)
        .ok_or_else(|| load_failed(&spec.name, "no typed layout for seeded table"))?;
    seed(bpf, spec)?;
    debug!("Seeded {} with {} entries", spec.name, spec.entries.len());
    Ok(())
}

fn seed_hash<K: Pod, V: Pod>(bpf: &mut Ebpf, spec: &MapSpec) -> Result<()> {
    let map = bpf
        .map_mut(&spec.name)
        .ok_or_else(|| load_failed(&spec.name, "table not found in object"))?;
    let mut table: HashMap<_, K, V> =
        HashMap::try_from(map).map_err(|e| load_failed(&spec.name, e))?;

    for entry in &spec.entries {
        let key = pod_from_bytes::<K>(&spec.name, "key", &entry.key)?;
        let value = pod_from_bytes::<V>(&spec.name, "value", &entry.value)?;
        table
            .insert(key, value, 0)
            .map_err(|e| load_failed(format!("seeding {}", spec.name), e))?;
    }
    Ok(())
}

fn seed_array<V: Pod>(bpf: &mut Ebpf, spec: &MapSpec) -> Result<()> {
    let map = bpf
        .map_mut(&spec.name)
        .ok_or_else(|| load_failed(&spec.name, "table not found in object"))?;
    let mut table: Array<_, V> = Array::try_from(map).map_err(|e| load_failed(&spec.name, e))?;

    for entry in &spec.entries {
        let index = pod_from_bytes::<u32>(&spec.name, "key", &entry.key)?;
        let value = pod_from_bytes::<V>(&spec.name, "value", &entry.value)?;
        table
            .set(index, value, 0)
            .map_err(|e| load_failed(format!("seeding {}[{}]", spec.name, index), e))?;
    }
    Ok(())
}

/// Reinterpret an encoded entry as the shared record it was laid out for
fn pod_from_bytes<T: Pod>(table: &str, field: &'static str, bytes: &[u8]) -> Result<T> {
    if bytes.len() != mem::size_of::<T>() {
        return Err(KitError::LayoutMismatch {
            map: table.to_string(),
            field,
            expected: mem::size_of::<T>(),
            actual: bytes.len(),
        });
    }
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

fn load_program(bpf: &mut Ebpf, name: &str) -> Result<()> {
    let program = bpf
        .program_mut(name)
        .ok_or_else(|| load_failed(name, "program not found in object"))?;
    let result = match program {
        Program::KProbe(p) => p.load(),
        Program::TracePoint(p) => p.load(),
        Program::UProbe(p) => p.load(),
        Program::Xdp(p) => p.load(),
        Program::SchedClassifier(p) => p.load(),
        _ => return Err(load_failed(name, "unsupported program type")),
    };
    result.map_err(|e| load_failed(name, e))?;
    debug!("Loaded program {}", name);
    Ok(())
}

fn fill_dispatch_table(
    bpf: &mut Ebpf,
    graph: &ProbeGraph,
    spec: &MapSpec,
) -> Result<ProgramArray<MapData>> {
    let map = bpf
        .take_map(&spec.name)
        .ok_or_else(|| load_failed(&spec.name, "dispatch table not found in object"))?;
    let mut array = ProgramArray::try_from(map).map_err(|e| load_failed(&spec.name, e))?;

    for edge in graph.routes.iter().filter(|e| e.table == spec.name) {
        let target = graph
            .probes
            .get(&edge.target)
            .ok_or_else(|| KitError::UnregisteredProbe {
                table: edge.table.clone(),
                key: edge.key,
                probe: edge.target.to_string(),
            })?;
        let name = target.program_name();
        let program = bpf
            .program(&name)
            .ok_or_else(|| load_failed(&name, "program not found in object"))?;
        let fd = program.fd().map_err(|e| load_failed(&name, e))?;
        array
            .set(edge.key, fd, 0)
            .map_err(|e| load_failed(format!("{}[{}]", spec.name, edge.key), e))?;
    }
    Ok(array)
}

fn attach_probe(bpf: &mut Ebpf, probe: &ProbeSpec) -> Result<()> {
    let name = probe.program_name();
    let program = bpf
        .program_mut(&name)
        .ok_or_else(|| attach_failed(&probe.id, "program not found in object"))?;

    match (&probe.attach, program) {
        (Attach::TailCall, _) => return Ok(()),
        (Attach::Kernel, Program::KProbe(p)) => {
            p.attach(probe.target(), 0)
                .map_err(|e| attach_failed(&probe.id, e))?;
        }
        (Attach::Kernel, Program::TracePoint(p)) => {
            let (category, event) = tracepoint_target(probe.target())
                .map_err(|e| attach_failed(&probe.id, e))?;
            p.attach(category, event)
                .map_err(|e| attach_failed(&probe.id, e))?;
        }
        (
            Attach::User {
                binary,
                symbol_pattern,
            },
            Program::UProbe(p),
        ) => {
            let symbol = match symbol_pattern {
                Some(pattern) => {
                    symbols::resolve(binary, pattern).map_err(|e| attach_failed(&probe.id, e))?
                }
                None => probe.target().to_string(),
            };
            debug!("Resolved {} to {}", probe.id, symbol);
            p.attach(Some(symbol.as_str()), 0, binary, None)
                .map_err(|e| attach_failed(&probe.id, e))?;
        }
        (
            Attach::Network {
                ifname,
                direction: NetworkDirection::Ingress,
            },
            Program::Xdp(p),
        ) => {
            p.attach(ifname, XdpFlags::SKB_MODE)
                .map_err(|e| attach_failed(&probe.id, e))?;
        }
        (
            Attach::Network {
                ifname,
                direction: NetworkDirection::Egress,
            },
            Program::SchedClassifier(p),
        ) => {
            // clsact is required for TC attachment and may already exist
            if let Err(e) = tc::qdisc_add_clsact(ifname) {
                warn!("Failed to add clsact qdisc on {} (may already exist): {}", ifname, e);
            }
            p.attach(ifname, TcAttachType::Egress)
                .map_err(|e| attach_failed(&probe.id, e))?;
        }
        (attach, _) => {
            return Err(attach_failed(
                &probe.id,
                format!("{:?} does not fit a {} program", attach, kind_name(probe)),
            ))
        }
    }

    debug!("Attached {}", probe.id);
    Ok(())
}

fn kind_name(probe: &ProbeSpec) -> &'static str {
    probe.kind().map(|k| k.as_str()).unwrap_or("unknown")
}

/// Split `category/event` of a tracepoint section
fn tracepoint_target(target: &str) -> anyhow::Result<(&str, &str)> {
    target
        .split_once('/')
        .filter(|(category, event)| !category.is_empty() && !event.is_empty())
        .ok_or_else(|| anyhow!("{} is not a category/event pair", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebpfkit::maps::catalog::{main_catalog, HEALTH_CHECK_REQUEST};
    use ebpfkit::probe::ProbeSpec;
    use ebpfkit_common::{http_action, xdp};

    #[test]
    fn test_tracepoint_target() {
        let probe = ProbeSpec::kernel("tracepoint/raw_syscalls/sys_enter");
        assert_eq!(
            tracepoint_target(probe.target()).unwrap(),
            ("raw_syscalls", "sys_enter")
        );
        assert!(tracepoint_target("sys_enter").is_err());
        assert!(tracepoint_target("sched/").is_err());
    }

    #[test]
    fn test_every_seeded_table_has_a_seeder() {
        let catalog = main_catalog().unwrap();
        for map in catalog.iter().filter(|m| m.is_seeded()) {
            assert!(seeder(&map.name).is_some(), "{} has no seeder", map.name);
        }
        assert!(seeder("read_cache").is_none());
    }

    #[test]
    fn test_pod_from_bytes_checks_width() {
        let err = pod_from_bytes::<HttpRoute>("http_routes", "value", &[0u8; 267]).unwrap_err();
        assert!(matches!(
            err,
            KitError::LayoutMismatch { expected: 268, actual: 267, .. }
        ));
        assert_eq!(pod_from_bytes::<u32>("raw_packets", "key", &7u32.to_ne_bytes()).unwrap(), 7);
    }

    #[test]
    fn test_routes_decode_into_shared_record() {
        let catalog = main_catalog().unwrap();
        let routes = catalog.get("http_routes").unwrap();
        let put_pipe = routes
            .entries
            .iter()
            .find(|e| e.key.starts_with(b"GET /put_pipe_pg"))
            .unwrap();

        let route = pod_from_bytes::<HttpRoute>("http_routes", "value", &put_pipe.value).unwrap();
        assert_eq!(route.action, http_action::EDIT);
        assert_eq!(route.handler, xdp::PUT_PIPE_PROG);
        assert_eq!(route.new_data_len as usize, HEALTH_CHECK_REQUEST.len());
        assert_eq!(&route.new_data[..HEALTH_CHECK_REQUEST.len()], HEALTH_CHECK_REQUEST);
    }

    #[test]
    fn test_kind_name() {
        assert_eq!(kind_name(&ProbeSpec::kernel("xdp/ingress")), "xdp");
    }
}
