//! Tables of the main program set, with their load-time contents

use super::{MapCatalog, MapKind, MapSpec};
use crate::layout::{
    CommPair, CommProgram, DnsName, FsWatchKey, HttpResponsePattern, HttpRoute,
    HttpRouteKey, ImageAction, ImageOverride, ImageOverrideKey, Ipv4Value, PingAction,
    PipedProgram, PostgresMd5, PostgresRole, QueryPattern, RawPacket,
};
use crate::Result;
use ebpfkit_common::{pipe_prog, raw_packet, xdp, FS_WATCH_PATH_LEN};
use std::net::Ipv4Addr;

pub const XDP_PROGS: &str = "xdp_progs";
pub const TC_PROGS: &str = "tc_progs";
pub const SYS_ENTER_PROGS: &str = "sys_enter_progs";
pub const FA_PROGS: &str = "fa_progs";

/// Request forwarded to the web application in place of a control request
pub const HEALTH_CHECK_REQUEST: &[u8] = b"GET /healthcheck HTTP/1.1\nAccept: */*\nAccept-Encoding: gzip, deflate\nConnection: keep-alive\nHost: localhost:8000";

const PRODUCTS_REQUEST: &[u8] = b"POST /api/products HTTP/1.1\nAccept: */*\nAccept-Encoding: gzip, deflate\nConnection: keep-alive\nContent-Length: 0\nHost: localhost:8000";

/// Every table read or written by the main program set
pub fn main_catalog() -> Result<MapCatalog> {
    let mut catalog = MapCatalog::new();
    for map in seeded_tables()? {
        catalog.declare(map)?;
    }
    for map in runtime_tables() {
        catalog.declare(map)?;
    }
    for map in program_arrays() {
        catalog.declare(map)?;
    }
    Ok(catalog)
}

fn seeded_tables() -> Result<Vec<MapSpec>> {
    Ok(vec![
        MapSpec::typed::<HttpResponsePattern, u8>("http_resp_pattern", MapKind::Hash, 16)
            .seed(&HttpResponsePattern("HTTP/1.1 200 OK".to_string()), &1u8)?,
        comm_prog_key()?,
        MapSpec::typed::<u32, PipedProgram>("piped_progs", MapKind::Hash, 64)
            .seed(&pipe_prog::PYTHON, &PipedProgram::new("print('hello world')"))?
            .seed(&pipe_prog::SHELL, &PipedProgram::new("echo hello world; "))?,
        MapSpec::typed::<ImageOverrideKey, ImageOverride>("image_override", MapKind::Hash, 1024)
            .seed(
                &ImageOverrideKey::prefix_of("debian"),
                &ImageOverride {
                    action: ImageAction::Replace,
                    ping: PingAction::Nop,
                    prefix: 6,
                    replace_with: "ubuntu".to_string(),
                },
            )?,
        dedicated_watch_keys()?,
        MapSpec::typed::<PostgresRole, PostgresMd5>("postgres_roles", MapKind::Hash, 1024)
            .seed(
                &PostgresRole("webapp".to_string()),
                &PostgresMd5::new("hello", "webapp"),
            )?,
        dns_table()?,
        http_routes()?,
        raw_packets()?,
        MapSpec::typed::<QueryPattern, QueryPattern>("query_override_pattern", MapKind::Hash, 16)
            .seed(
                &QueryPattern("SELECT * FROM product WHERE category='defcon'".to_string()),
                &QueryPattern("SELECT * FROM product WHERE category='defconn".to_string()),
            )?,
    ])
}

fn comm_prog_key() -> Result<MapSpec> {
    let python = CommProgram {
        prog_key: pipe_prog::PYTHON,
        backup: false,
    };
    let shell = CommProgram {
        prog_key: pipe_prog::SHELL,
        backup: true,
    };

    MapSpec::typed::<CommPair, CommProgram>("comm_prog_key", MapKind::Hash, 256)
        .seed(&CommPair::new("cat", "python"), &python)?
        .seed(&CommPair::new("cat", "python3"), &python)?
        .seed(&CommPair::new("cat", "python3.8"), &python)?
        .seed(&CommPair::new("cat", "bash"), &shell)?
        .seed(&CommPair::new("", "sh"), &shell)
}

fn dedicated_watch_keys() -> Result<MapSpec> {
    MapSpec::typed::<u32, FsWatchKey>("dedicated_watch_keys", MapKind::Array, 8)
        .seed(&0u32, &FsWatchKey::new("/ebpfkit/images_list"))?
        .seed(&1u32, &FsWatchKey::new("/ebpfkit/pg_credentials"))?
        .seed(&2u32, &FsWatchKey::new("/ebpfkit/network_discovery"))
}

fn dns_table() -> Result<MapSpec> {
    MapSpec::typed::<DnsName, Ipv4Value>("dns_table", MapKind::Hash, 512)
        .seed(
            &DnsName::new("security.ubuntu.com"),
            &Ipv4Value(Ipv4Addr::LOCALHOST),
        )?
        .seed(&DnsName::new("google.fr"), &Ipv4Value(Ipv4Addr::LOCALHOST))?
        .seed(
            &DnsName::new("facebook.com"),
            &Ipv4Value(Ipv4Addr::new(172, 217, 19, 227)),
        )
}

fn http_routes() -> Result<MapSpec> {
    let handlers = [
        ("GET /add_fswatch", xdp::ADD_FS_WATCH),
        ("GET /del_fswatch", xdp::DEL_FS_WATCH),
        ("GET /get_fswatch", xdp::GET_FS_WATCH),
        ("GET /put_pipe_pg", xdp::PUT_PIPE_PROG),
        ("GET /del_pipe_pg", xdp::DEL_PIPE_PROG),
        ("GET /put_doc_img", xdp::PUT_DOCKER_IMAGE),
        ("GET /del_doc_img", xdp::DEL_DOCKER_IMAGE),
        ("GET /put_pg_role", xdp::PUT_POSTGRES_ROLE),
        ("GET /del_pg_role", xdp::DEL_POSTGRES_ROLE),
        ("GET /get_net_dis", xdp::GET_NETWORK_DISCOVERY),
        ("GET /get_net_sca", xdp::NETWORK_DISCOVERY_SCAN),
    ];

    let mut map = MapSpec::typed::<HttpRouteKey, HttpRoute>("http_routes", MapKind::Hash, 256);
    for (path, handler) in handlers {
        map = map.seed(
            &HttpRouteKey(path.to_string()),
            &HttpRoute::edit(handler, HEALTH_CHECK_REQUEST),
        )?;
    }

    // Plain rewrites, no handler
    map.seed(
        &HttpRouteKey("GET /hellofriend".to_string()),
        &HttpRoute::edit(xdp::DISPATCH, HEALTH_CHECK_REQUEST),
    )?
    .seed(
        &HttpRouteKey("GET /another_one".to_string()),
        &HttpRoute::edit(xdp::DISPATCH, &products_request()),
    )
}

/// The products request, zero padded to the 255 bytes the route replaces
fn products_request() -> Vec<u8> {
    let mut data = PRODUCTS_REQUEST.to_vec();
    data.resize(255, 0);
    data
}

fn raw_packets() -> Result<MapSpec> {
    // Addresses, ports and checksums are rewritten by the network programs
    let arp_request = vec![
        // ethernet: broadcast destination, source, ETH_P_ARP
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02, 0x0b, 0x59, 0x80, 0xc2, 0x09, 0x08, 0x06,
        // arp: ARPHRD_ETHER, ETH_P_IP, hlen 6, plen 4, op 1
        0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01,
        // sender mac and ip, target mac and ip
        0x02, 0x0b, 0x59, 0x80, 0xc2, 0x09, 0x0a, 0x00, 0x02, 0x0f, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x0a, 0x00, 0x02, 0x02,
    ];
    let syn_request = vec![
        // ethernet: destination, source, ETH_P_IP
        0x02, 0x0b, 0x59, 0x80, 0xc2, 0x09, 0x02, 0x0b, 0x59, 0x80, 0xc2, 0x09, 0x08, 0x00,
        // ipv4: ihl 5, tot_len 40, id 1, ttl 64, TCP, checksum, saddr, daddr
        0x45, 0x00, 0x00, 0x28, 0x00, 0x01, 0x00, 0x00, 0x40, 0x06, 0x7a, 0xd0, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        // tcp: source 49153, dest 8000, seq, ack, doff 5 + SYN, window, checksum, urg
        0xc0, 0x01, 0x1f, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02,
        0x20, 0x00, 0xb0, 0xa1, 0x00, 0x00,
    ];

    MapSpec::typed::<u32, RawPacket>("raw_packets", MapKind::Array, 8)
        .seed(&raw_packet::ARP_REQUEST, &RawPacket { data: arp_request })?
        .seed(&raw_packet::SYN_REQUEST, &RawPacket { data: syn_request })
}

/// Tables filled by the programs themselves
fn runtime_tables() -> Vec<MapSpec> {
    let watch_key = 1 + FS_WATCH_PATH_LEN;
    vec![
        MapSpec::new("http_response_gen", MapKind::Array, 4, 8, 1),
        MapSpec::new("http_resp_gen", MapKind::Array, 4, 8, 1),
        MapSpec::new("http_responses", MapKind::LruHash, 8, 512, 1024),
        MapSpec::new("read_cache", MapKind::LruHash, 8, 32, 4096),
        MapSpec::new("open_cache", MapKind::LruHash, 8, watch_key, 4096),
        MapSpec::new("pipe_ctx", MapKind::LruHash, 8, 24, 4096),
        MapSpec::new("piped_data_backup", MapKind::Hash, 4, 512, 1024),
        MapSpec::new("piped_data_backup_gen", MapKind::Array, 4, 4, 1),
        MapSpec::new("pipelines", MapKind::LruHash, 8, 40, 4096),
        MapSpec::new("pipe_writers", MapKind::LruHash, 8, 16, 4096),
        MapSpec::new("piped_progs_gen", MapKind::Array, 4, 4, 1),
        MapSpec::new("pid_pipe_tokens", MapKind::LruHash, 4, 8, 4096),
        MapSpec::new("dns_name_gen", MapKind::Array, 4, 4, 1),
        MapSpec::new("dns_request_cache", MapKind::LruHash, 4, 256, 1024),
        MapSpec::new("fs_watches", MapKind::Hash, watch_key, 512, 128),
        MapSpec::new("fs_watch_gen", MapKind::Array, 4, 4, 1),
        MapSpec::new("watched_fds", MapKind::LruHash, 8, watch_key, 4096),
        MapSpec::new("bpf_cache", MapKind::LruHash, 8, 32, 4096),
        MapSpec::new("bpf_programs", MapKind::Hash, 4, 4, 4096),
        MapSpec::new("bpf_next_id", MapKind::Hash, 4, 4, 4096),
        MapSpec::new("bpf_maps", MapKind::Hash, 4, 4, 4096),
        MapSpec::new("image_override_gen", MapKind::Array, 4, 4, 1),
        MapSpec::new("postgres_list_cursor", MapKind::Array, 4, 64, 1),
        MapSpec::new("image_list_cursor", MapKind::Array, 4, 72, 1),
        MapSpec::new("image_cache", MapKind::LruHash, 8, 72, 1024),
    ]
}

fn program_arrays() -> Vec<MapSpec> {
    vec![
        MapSpec::program_array(XDP_PROGS, 32),
        MapSpec::program_array(TC_PROGS, 8),
        MapSpec::program_array(SYS_ENTER_PROGS, 512),
        MapSpec::program_array(FA_PROGS, 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    #[test]
    fn test_catalog_builds() {
        let catalog = main_catalog().unwrap();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.len(), 39);
    }

    #[test]
    fn test_every_seeded_entry_matches_declared_widths() {
        let catalog = main_catalog().unwrap();
        for map in catalog.iter() {
            for entry in &map.entries {
                assert_eq!(entry.key.len(), map.key_size, "{} key", map.name);
                assert_eq!(entry.value.len(), map.value_size, "{} value", map.name);
            }
        }
    }

    #[test]
    fn test_seeded_tables_have_content() {
        let catalog = main_catalog().unwrap();
        let seeded: Vec<_> = catalog
            .iter()
            .filter(|m| m.is_seeded())
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(
            seeded,
            vec![
                "http_resp_pattern",
                "comm_prog_key",
                "piped_progs",
                "image_override",
                "dedicated_watch_keys",
                "postgres_roles",
                "dns_table",
                "http_routes",
                "raw_packets",
                "query_override_pattern",
            ]
        );
        assert_eq!(catalog.get("http_routes").unwrap().entries.len(), 13);
        assert_eq!(catalog.get("comm_prog_key").unwrap().entries.len(), 5);
    }

    #[test]
    fn test_route_table_decodes() {
        let catalog = main_catalog().unwrap();
        let routes = catalog.get("http_routes").unwrap();
        let first = &routes.entries[0];
        assert_eq!(
            HttpRouteKey::decode(&first.key).unwrap().0,
            "GET /add_fswatch"
        );
        let route = HttpRoute::decode(&first.value).unwrap();
        assert_eq!(route.handler, xdp::ADD_FS_WATCH);
        assert_eq!(route.new_data, HEALTH_CHECK_REQUEST);
    }

    #[test]
    fn test_packet_templates_have_wire_lengths() {
        let catalog = main_catalog().unwrap();
        let packets = catalog.get("raw_packets").unwrap();
        let arp = RawPacket::decode(&packets.entries[0].value).unwrap();
        let syn = RawPacket::decode(&packets.entries[1].value).unwrap();
        assert_eq!(arp.data.len(), 42);
        assert_eq!(syn.data.len(), 54);
    }
}
