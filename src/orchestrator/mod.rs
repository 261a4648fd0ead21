//! Assembly of the bootstrap and main probe graphs
//!
//! Both graphs are pure functions of `BuildInputs`. Host introspection
//! happens once in `BuildInputs::gather`; building twice from the same
//! inputs yields equal graphs.

pub mod bootstrap;
pub mod payload;
pub mod rules;

pub use bootstrap::build_bootstrap;
pub use payload::build_main;

use crate::config::KitOptions;
use crate::env::{exe_hash, HostEnvironment};
use crate::maps::MapCatalog;
use crate::options::LoadOptions;
use crate::probe::ProbeSet;
use crate::router::TailCallEdge;
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

const SELF_EXE: &str = "/proc/self/exe";

/// Everything a graph is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInputs {
    pub options: KitOptions,
    pub host: HostEnvironment,
    pub pid: u32,
    pub exe_hash: u64,
}

impl BuildInputs {
    pub fn gather(options: KitOptions) -> Result<Self> {
        let host = HostEnvironment::detect(&options);
        let exe_hash = exe_hash(Path::new(SELF_EXE))?;
        debug!("Host environment: {:?}", host);

        Ok(Self {
            options,
            host,
            pid: std::process::id(),
            exe_hash,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GraphKind {
    Bootstrap,
    Main,
}

impl GraphKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GraphKind::Bootstrap => "bootstrap",
            GraphKind::Main => "main",
        }
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable configuration handed to the loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeGraph {
    pub kind: GraphKind,
    pub probes: ProbeSet,
    pub maps: MapCatalog,
    pub routes: Vec<TailCallEdge>,
    pub options: LoadOptions,
}
