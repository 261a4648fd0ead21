//! Host checks run before the first graph is loaded

use anyhow::{anyhow, Context};
use log::{info, warn};
use std::fmt;
use std::fs;
use std::path::Path;

/// Oldest kernel with the ring buffer and tail call support the programs
/// rely on
pub const MIN_KERNEL: KernelVersion = KernelVersion { major: 5, minor: 8 };

const OSRELEASE: &str = "/proc/sys/kernel/osrelease";
const VMLINUX_BTF: &str = "/sys/kernel/btf/vmlinux";
/// kprobe and tracepoint attachment goes through one of these
const TRACEFS_MOUNTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
}

impl KernelVersion {
    /// Parse the leading `major.minor` of a release string such as
    /// `6.8.0-45-generic`
    pub fn parse(release: &str) -> anyhow::Result<Self> {
        let mut parts = release.trim().splitn(3, '.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("empty kernel release"))?;
        let minor = parts
            .next()
            .ok_or_else(|| anyhow!("kernel release {} has no minor version", release.trim()))?;
        let minor = minor
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .unwrap_or_default();

        Ok(Self {
            major: major
                .parse()
                .with_context(|| format!("invalid kernel major version in {}", release.trim()))?,
            minor: minor
                .parse()
                .with_context(|| format!("invalid kernel minor version in {}", release.trim()))?,
        })
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What the host offers. Only the kernel version is a hard requirement;
/// the rest surfaces later as load or attach errors.
#[derive(Debug, Clone)]
pub struct HostReport {
    pub release: String,
    pub kernel: KernelVersion,
    pub btf: bool,
    pub tracefs: Option<&'static str>,
    pub root: bool,
}

impl HostReport {
    pub fn gather() -> anyhow::Result<Self> {
        let release = fs::read_to_string(OSRELEASE)
            .with_context(|| format!("Failed to read {}", OSRELEASE))?
            .trim()
            .to_string();
        let kernel = KernelVersion::parse(&release)?;

        Ok(Self {
            release,
            kernel,
            btf: Path::new(VMLINUX_BTF).exists(),
            tracefs: TRACEFS_MOUNTS
                .into_iter()
                .find(|mount| Path::new(mount).join("events").is_dir()),
            root: unsafe { libc::geteuid() } == 0,
        })
    }

    /// Fails when the kernel is older than `MIN_KERNEL`; logs the soft gaps
    pub fn check(&self) -> anyhow::Result<()> {
        if self.kernel < MIN_KERNEL {
            return Err(anyhow!(
                "kernel {} is older than {}, the oldest supported release",
                self.release,
                MIN_KERNEL
            ));
        }
        if !self.btf {
            warn!("{} missing, relocations against kernel types will fail", VMLINUX_BTF);
        }
        match self.tracefs {
            Some(mount) => info!("tracefs at {}", mount),
            None => warn!("tracefs not mounted, kprobes and tracepoints cannot attach"),
        }
        if !self.root {
            warn!("not running as root; CAP_BPF, CAP_NET_ADMIN, CAP_SYS_ADMIN and CAP_SYS_RESOURCE are needed");
        }
        Ok(())
    }
}

/// Gather and check the host in one go
pub fn run_preflight_checks() -> anyhow::Result<HostReport> {
    let report = HostReport::gather()?;
    report.check()?;
    info!(
        "Host kernel {} (btf: {}, root: {})",
        report.release, report.btf, report.root
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(release: &str) -> HostReport {
        HostReport {
            release: release.to_string(),
            kernel: KernelVersion::parse(release).unwrap(),
            btf: false,
            tracefs: None,
            root: false,
        }
    }

    #[test]
    fn test_parse_release() {
        let v = KernelVersion::parse("5.15.0-91-generic\n").unwrap();
        assert_eq!(v, KernelVersion { major: 5, minor: 15 });
        assert_eq!(KernelVersion::parse("6.8").unwrap().to_string(), "6.8");
        assert_eq!(KernelVersion::parse("4.19-rc1").unwrap().minor, 19);
        assert_eq!(KernelVersion::parse("6.1+").unwrap().minor, 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(KernelVersion::parse("").is_err());
        assert!(KernelVersion::parse("linux").is_err());
        assert!(KernelVersion::parse("x.y").is_err());
        assert!(KernelVersion::parse("5.rc").is_err());
    }

    #[test]
    fn test_minimum_kernel() {
        assert!(report("5.8.0").check().is_ok());
        assert!(report("6.2.0-39-generic").check().is_ok());
        assert!(report("5.7.19").check().is_err());
        assert!(report("4.19.0").check().is_err());
    }

    #[test]
    fn test_version_order_is_numeric() {
        assert!(KernelVersion::parse("5.10").unwrap() > KernelVersion::parse("5.8").unwrap());
    }
}
