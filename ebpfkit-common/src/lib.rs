//! Shared layouts between the ebpfkit kernel programs and userspace
//!
//! This crate defines the table records and dispatch keys that must be:
//! - `#[repr(C)]` for stable memory layout
//! - `no_std` compatible for eBPF
//! - identical on both sides of every shared table
//!
//! Integers are native endian. Strings are NUL padded to their field width.

#![cfg_attr(not(feature = "userspace"), no_std)]

/// Length of a task `comm`, including the trailing NUL
pub const TASK_COMM_LEN: usize = 16;
pub const PIPED_SCRIPT_LEN: usize = 508;
pub const DOCKER_IMAGE_KEY_LEN: usize = 68;
pub const DOCKER_IMAGE_LEN: usize = 64;
pub const FS_WATCH_PATH_LEN: usize = 256;
pub const POSTGRES_ROLE_LEN: usize = 64;
/// `"md5"` followed by 32 lowercase hex digits
pub const POSTGRES_MD5_LEN: usize = 35;
pub const DNS_NAME_LEN: usize = 256;
pub const HTTP_ROUTE_KEY_LEN: usize = 16;
pub const HTTP_DATA_LEN: usize = 256;
pub const HTTP_RESP_PATTERN_LEN: usize = 15;
pub const RAW_PACKET_LEN: usize = 500;
pub const QUERY_PATTERN_LEN: usize = 128;

/// Key of `comm_prog_key`: the writer and the reader of a pipe
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct CommPair {
    pub from: [u8; TASK_COMM_LEN],
    pub to: [u8; TASK_COMM_LEN],
}

/// Value of `comm_prog_key`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "userspace", derive(PartialEq, Eq))]
pub struct CommProgram {
    pub prog_key: u32,
    pub backup: u32,
}

/// Value of `piped_progs`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PipedProgram {
    pub len: u32,
    pub script: [u8; PIPED_SCRIPT_LEN],
}

/// Key of `image_override`. Only the first `prefix` bytes of `image` are
/// significant when matching.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ImageOverrideKey {
    pub prefix: u32,
    pub image: [u8; DOCKER_IMAGE_KEY_LEN],
}

/// Value of `image_override`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ImageOverride {
    pub action: u16,
    pub ping: u16,
    pub prefix: u32,
    pub replace_with: [u8; DOCKER_IMAGE_LEN],
}

/// Value of `dedicated_watch_keys`, key of `fs_watches`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FsWatchKey {
    pub flag: u8,
    pub path: [u8; FS_WATCH_PATH_LEN],
}

/// Value of `http_routes`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct HttpRoute {
    pub action: u32,
    pub handler: u32,
    pub new_data_len: u32,
    pub new_data: [u8; HTTP_DATA_LEN],
}

/// Value of `raw_packets`
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RawPacket {
    pub len: u32,
    pub data: [u8; RAW_PACKET_LEN],
}

/// Keys of the ingress dispatch table (`xdp_progs`). Also used as handler
/// ids in `http_routes`.
pub mod xdp {
    pub const DISPATCH: u32 = 0;
    pub const HTTP_ACTION: u32 = 1;
    pub const ADD_FS_WATCH: u32 = 2;
    pub const DEL_FS_WATCH: u32 = 3;
    /// Answered on the egress path, never tail called from ingress
    pub const GET_FS_WATCH: u32 = 4;
    pub const DNS_RESPONSE: u32 = 5;
    pub const PUT_PIPE_PROG: u32 = 6;
    pub const DEL_PIPE_PROG: u32 = 7;
    pub const PUT_DOCKER_IMAGE: u32 = 8;
    pub const DEL_DOCKER_IMAGE: u32 = 9;
    pub const PUT_POSTGRES_ROLE: u32 = 10;
    pub const DEL_POSTGRES_ROLE: u32 = 11;
    pub const GET_NETWORK_DISCOVERY: u32 = 12;
    pub const NETWORK_DISCOVERY_SCAN: u32 = 13;
    pub const ARP_MONITORING: u32 = 14;
    pub const SYN_LOOP: u32 = 15;
}

/// Keys of the egress dispatch table (`tc_progs`)
pub mod tc {
    pub const DISPATCH: u32 = 0;
}

/// Keys of the raw syscall entry dispatch table (`sys_enter_progs`)
pub mod syscall {
    pub const NEWFSTATAT: u32 = 262;
}

/// Keys of the file action dispatch table (`fa_progs`)
pub mod file_action {
    pub const KMSG: u32 = 0;
    pub const FILL_WITH_ZERO: u32 = 1;
    pub const OVERRIDE_CONTENT: u32 = 2;
    pub const OVERRIDE_GETDENTS: u32 = 3;
}

/// `HttpRoute::action` tags
pub mod http_action {
    pub const NOP: u32 = 0;
    pub const DROP: u32 = 1;
    pub const EDIT: u32 = 2;
}

/// `ImageOverride::action` tags
pub mod image_action {
    pub const NOP: u16 = 0;
    pub const REPLACE: u16 = 1;
}

/// `ImageOverride::ping` tags
pub mod ping_action {
    pub const NOP: u16 = 0;
    pub const CRASH: u16 = 1;
    pub const RUN: u16 = 2;
    pub const HIT: u16 = 3;
}

/// Keys of `piped_progs`
pub mod pipe_prog {
    pub const PYTHON: u32 = 1;
    pub const SHELL: u32 = 2;
}

/// Keys of `raw_packets`
pub mod raw_packet {
    pub const ARP_REQUEST: u32 = 0;
    pub const SYN_REQUEST: u32 = 1;
}

// Userspace seeds the shared tables through aya's typed map APIs, which
// check these widths against the object. The kernel side never sees aya.
#[cfg(all(feature = "userspace", target_os = "linux"))]
mod user_impls {
    extern crate aya;

    use super::{
        CommPair, CommProgram, FsWatchKey, HttpRoute, ImageOverride, ImageOverrideKey,
        PipedProgram, RawPacket,
    };
    use aya::Pod;

    unsafe impl Pod for CommPair {}
    unsafe impl Pod for CommProgram {}
    unsafe impl Pod for PipedProgram {}
    unsafe impl Pod for ImageOverrideKey {}
    unsafe impl Pod for ImageOverride {}
    unsafe impl Pod for FsWatchKey {}
    unsafe impl Pod for HttpRoute {}
    unsafe impl Pod for RawPacket {}
}

#[cfg(feature = "userspace")]
const _: () = {
    assert!(
        core::mem::size_of::<CommPair>() == 32,
        "CommPair must be exactly 32 bytes"
    );
    assert!(
        core::mem::size_of::<CommProgram>() == 8,
        "CommProgram must be exactly 8 bytes"
    );
    assert!(
        core::mem::size_of::<PipedProgram>() == 512,
        "PipedProgram must be exactly 512 bytes"
    );
    assert!(
        core::mem::size_of::<ImageOverrideKey>() == 72,
        "ImageOverrideKey must be exactly 72 bytes"
    );
    assert!(
        core::mem::size_of::<ImageOverride>() == 72,
        "ImageOverride must be exactly 72 bytes"
    );
    assert!(
        core::mem::size_of::<FsWatchKey>() == 257,
        "FsWatchKey must be exactly 257 bytes"
    );
    assert!(
        core::mem::size_of::<HttpRoute>() == 268,
        "HttpRoute must be exactly 268 bytes"
    );
    assert!(
        core::mem::size_of::<RawPacket>() == 504,
        "RawPacket must be exactly 504 bytes"
    );
};
