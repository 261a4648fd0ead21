//! Load-time options handed to the loader with each probe graph

use serde::Serialize;

/// Maximum number of concurrently active kretprobe instances
pub const KPROBE_MAX_ACTIVE: u32 = 512;

/// Verifier log buffer size. Big enough for the rejection log of the
/// largest program set; a smaller buffer truncates diagnostics.
pub const VERIFIER_LOG_SIZE: u32 = 2 * 1024 * 1024;

pub const PID_CONSTANT: &str = "ebpfkit_pid";
pub const HASH_CONSTANT: &str = "ebpfkit_hash";
pub const HTTP_PORT_CONSTANT: &str = "http_server_port";

/// A named constant rewritten in the programs before load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstantBinding {
    pub name: String,
    pub value: u64,
}

impl ConstantBinding {
    pub fn new(name: &str, value: u64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

/// `RLIMIT_MEMLOCK` override applied before any map is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemlockLimit {
    pub cur: u64,
    pub max: u64,
}

impl MemlockLimit {
    /// Lift the limit entirely. Some hosts default to 64 bytes, which makes
    /// map creation fail with EPERM.
    pub const fn unlimited() -> Self {
        Self {
            cur: u64::MAX,
            max: u64::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOptions {
    pub kprobe_max_active: u32,
    pub verifier_log_size: u32,
    pub memlock: MemlockLimit,
    pub constants: Vec<ConstantBinding>,
}

impl LoadOptions {
    fn with_constants(constants: Vec<ConstantBinding>) -> Self {
        Self {
            kprobe_max_active: KPROBE_MAX_ACTIVE,
            verifier_log_size: VERIFIER_LOG_SIZE,
            memlock: MemlockLimit::unlimited(),
            constants,
        }
    }

    pub fn constant(&self, name: &str) -> Option<u64> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }
}

pub fn bootstrap_options(pid: u32, exe_hash: u64) -> LoadOptions {
    LoadOptions::with_constants(vec![
        ConstantBinding::new(PID_CONSTANT, pid as u64),
        ConstantBinding::new(HASH_CONSTANT, exe_hash),
    ])
}

pub fn main_options(http_server_port: u16, pid: u32) -> LoadOptions {
    LoadOptions::with_constants(vec![
        ConstantBinding::new(HTTP_PORT_CONSTANT, http_server_port as u64),
        ConstantBinding::new(PID_CONSTANT, pid as u64),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_binds_pid_and_hash() {
        let options = bootstrap_options(42, 0xdead_beef);
        assert_eq!(options.constant(PID_CONSTANT), Some(42));
        assert_eq!(options.constant(HASH_CONSTANT), Some(0xdead_beef));
        assert_eq!(options.constant(HTTP_PORT_CONSTANT), None);
        assert_eq!(options.memlock, MemlockLimit::unlimited());
    }

    #[test]
    fn test_main_binds_port_and_pid() {
        let options = main_options(8000, 42);
        assert_eq!(options.constant(HTTP_PORT_CONSTANT), Some(8000));
        assert_eq!(options.constant(PID_CONSTANT), Some(42));
        assert_eq!(options.constant(HASH_CONSTANT), None);
        assert_eq!(options.kprobe_max_active, 512);
        assert_eq!(options.verifier_log_size, 2_097_152);
    }
}
