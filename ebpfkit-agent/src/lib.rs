//! Loader collaborator for ebpfkit
//!
//! Responsibilities:
//! - Check the host kernel before anything is loaded
//! - Raise the memlock limit and inject load-time constants
//! - Load one compiled object per probe graph
//! - Seed override tables and fill dispatch tables
//! - Attach entry probes and release them on every exit path

#[cfg(target_os = "linux")]
pub mod preflight;
#[cfg(target_os = "linux")]
pub mod probe_loader;
#[cfg(target_os = "linux")]
pub mod symbols;
