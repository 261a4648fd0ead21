//! Probe declarations and the set an orchestrator hands to the loader

use crate::{KitError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Program type, derived from the section prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProgramKind {
    KProbe,
    KRetProbe,
    TracePoint,
    UProbe,
    Xdp,
    Classifier,
}

impl ProgramKind {
    pub fn from_section(section: &str) -> Option<Self> {
        let (prefix, _) = section.split_once('/')?;
        match prefix {
            "kprobe" => Some(ProgramKind::KProbe),
            "kretprobe" => Some(ProgramKind::KRetProbe),
            "tracepoint" => Some(ProgramKind::TracePoint),
            "uprobe" => Some(ProgramKind::UProbe),
            "xdp" => Some(ProgramKind::Xdp),
            "classifier" => Some(ProgramKind::Classifier),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            ProgramKind::KProbe => "kprobe",
            ProgramKind::KRetProbe => "kretprobe",
            ProgramKind::TracePoint => "tracepoint",
            ProgramKind::UProbe => "uprobe",
            ProgramKind::Xdp => "xdp",
            ProgramKind::Classifier => "classifier",
        }
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkDirection {
    Ingress,
    Egress,
}

/// Where and how a program is attached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Attach {
    /// Kernel function or tracepoint named by the section
    Kernel,
    /// Symbol of a user-space binary. Without a pattern, the symbol is the
    /// section suffix.
    User {
        binary: PathBuf,
        symbol_pattern: Option<String>,
    },
    Network {
        ifname: String,
        direction: NetworkDirection,
    },
    /// Loaded but never attached; reached through a dispatch table
    TailCall,
}

/// Section name plus optional uid, unique within a probe set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProbeId {
    pub section: String,
    pub uid: Option<String>,
}

impl ProbeId {
    pub fn new(section: &str) -> Self {
        Self {
            section: section.to_string(),
            uid: None,
        }
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "{} ({})", self.section, uid),
            None => write!(f, "{}", self.section),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeSpec {
    pub id: ProbeId,
    pub attach: Attach,
}

impl ProbeSpec {
    pub fn kernel(section: &str) -> Self {
        Self {
            id: ProbeId::new(section),
            attach: Attach::Kernel,
        }
    }

    pub fn tail_call(section: &str) -> Self {
        Self {
            id: ProbeId::new(section),
            attach: Attach::TailCall,
        }
    }

    pub fn user(section: &str, binary: PathBuf, symbol_pattern: Option<&str>) -> Self {
        Self {
            id: ProbeId::new(section),
            attach: Attach::User {
                binary,
                symbol_pattern: symbol_pattern.map(str::to_string),
            },
        }
    }

    pub fn network(section: &str, uid: &str, ifname: &str, direction: NetworkDirection) -> Self {
        Self {
            id: ProbeId {
                section: section.to_string(),
                uid: Some(uid.to_string()),
            },
            attach: Attach::Network {
                ifname: ifname.to_string(),
                direction,
            },
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.id.uid = Some(uid.to_string());
        self
    }

    pub fn section(&self) -> &str {
        &self.id.section
    }

    pub fn kind(&self) -> Option<ProgramKind> {
        ProgramKind::from_section(&self.id.section)
    }

    /// Name of the program in the compiled object: the section with every
    /// `/` replaced by `_`
    pub fn program_name(&self) -> String {
        self.id.section.replace('/', "_")
    }

    /// Section without its program type prefix, e.g. `__x64_sys_open`
    pub fn target(&self) -> &str {
        self.id
            .section
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.id.section)
    }
}

/// Ordered probe list with unique identification pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProbeSet {
    probes: Vec<ProbeSpec>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: ProbeSpec) -> Result<()> {
        if probe.kind().is_none() {
            return Err(KitError::ConfigError(format!(
                "unknown program type in section {}",
                probe.section()
            )));
        }
        if self.contains(&probe.id) {
            return Err(KitError::DuplicateProbe(probe.id.to_string()));
        }
        self.probes.push(probe);
        Ok(())
    }

    pub fn extend(&mut self, probes: impl IntoIterator<Item = ProbeSpec>) -> Result<()> {
        for probe in probes {
            self.insert(probe)?;
        }
        Ok(())
    }

    pub fn contains(&self, id: &ProbeId) -> bool {
        self.probes.iter().any(|p| &p.id == id)
    }

    pub fn get(&self, id: &ProbeId) -> Option<&ProbeSpec> {
        self.probes.iter().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeSpec> {
        self.probes.iter()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Distinct program names, in first-use order
    pub fn program_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.probes
            .iter()
            .map(ProbeSpec::program_name)
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_section() {
        assert_eq!(
            ProgramKind::from_section("kretprobe/__x64_sys_open"),
            Some(ProgramKind::KRetProbe)
        );
        assert_eq!(
            ProgramKind::from_section("tracepoint/raw_syscalls/sys_enter"),
            Some(ProgramKind::TracePoint)
        );
        assert_eq!(ProgramKind::from_section("socket"), None);
        assert_eq!(ProgramKind::from_section("lsm/bpf"), None);
    }

    #[test]
    fn test_duplicate_probe_rejected() {
        let mut set = ProbeSet::new();
        set.insert(ProbeSpec::kernel("kretprobe/__x64_sys_getdents64"))
            .unwrap();
        let err = set
            .insert(ProbeSpec::kernel("kretprobe/__x64_sys_getdents64"))
            .unwrap_err();
        assert!(matches!(err, KitError::DuplicateProbe(_)));

        set.insert(ProbeSpec::kernel("kretprobe/__x64_sys_getdents64").with_uid("MainGetdents"))
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_shared_program_listed_once() {
        let mut set = ProbeSet::new();
        set.insert(ProbeSpec::network("xdp/ingress", "ingress", "eth0", NetworkDirection::Ingress))
            .unwrap();
        set.insert(ProbeSpec::network("xdp/ingress", "lo-ingress", "lo", NetworkDirection::Ingress))
            .unwrap();
        assert_eq!(set.program_names(), vec!["xdp_ingress".to_string()]);
    }

    #[test]
    fn test_target_strips_prefix() {
        let probe = ProbeSpec::kernel("tracepoint/sched/sched_process_fork");
        assert_eq!(probe.target(), "sched/sched_process_fork");
        assert_eq!(probe.program_name(), "tracepoint_sched_sched_process_fork");
    }
}
