//! ebpfkit-agent - loads the bootstrap and main probe graphs
//!
//! The agent:
//! - Builds both graphs from the current host
//! - Loads the bootstrap graph, then the main graph
//! - Holds them until Ctrl-C or SIGTERM
//! - Unloads main, then bootstrap

use anyhow::Result;
use clap::Parser;
use ebpfkit::config::KitOptions;
use std::path::PathBuf;

pub const DEFAULT_BOOTSTRAP_OBJECT: &str = "/usr/lib/ebpfkit/bootstrap.o";
pub const DEFAULT_MAIN_OBJECT: &str = "/usr/lib/ebpfkit/probe.o";

#[derive(Parser)]
#[command(name = "ebpfkit-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Load and attach the ebpfkit probe graphs", long_about = None)]
struct Args {
    #[arg(long, default_value = DEFAULT_MAIN_OBJECT, help = "Compiled object of the main graph")]
    object: PathBuf,

    #[arg(long, default_value = DEFAULT_BOOTSTRAP_OBJECT, help = "Compiled object of the bootstrap graph")]
    bootstrap_object: PathBuf,

    #[arg(short, long, help = "YAML file replacing the option flags")]
    config: Option<PathBuf>,

    #[command(flatten)]
    options: KitOptions,
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    let _ = Args::parse();
    eprintln!("Error: ebpfkit-agent requires Linux to load eBPF programs");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> Result<()> {
    use anyhow::Context;
    use ebpfkit::config::resolve;
    use ebpfkit::loader::Manager;
    use ebpfkit::orchestrator::{build_bootstrap, build_main, BuildInputs};
    use ebpfkit_agent::preflight::run_preflight_checks;
    use ebpfkit_agent::probe_loader::{AyaHandle, AyaLoader};
    use log::{info, warn};
    use tokio::signal;
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("ebpfkit-agent v{} starting...", ebpfkit::VERSION);

    let options = resolve(args.options, args.config.as_deref()).context("Invalid configuration")?;
    run_preflight_checks()?;

    let inputs = BuildInputs::gather(options).context("Failed to inspect host")?;
    let mut bootstrap: Manager<AyaHandle> =
        Manager::built(build_bootstrap(&inputs).context("Failed to build bootstrap graph")?);
    let mut payload: Manager<AyaHandle> =
        Manager::built(build_main(&inputs).context("Failed to build main graph")?);

    bootstrap
        .start(&mut AyaLoader::new(&args.bootstrap_object))
        .context("Failed to load bootstrap graph")?;
    payload
        .start(&mut AyaLoader::new(&args.object))
        .context("Failed to load main graph")?;

    info!("ebpfkit-agent running. Press Ctrl+C to exit.");

    let mut sigterm = unix_signal(SignalKind::terminate()).context("Failed to watch SIGTERM")?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("Shutdown signal received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }

    if let Err(e) = payload.stop() {
        warn!("Failed to unload main graph: {}", e);
    }
    if let Err(e) = bootstrap.stop() {
        warn!("Failed to unload bootstrap graph: {}", e);
    }

    info!("ebpfkit-agent stopped");
    Ok(())
}
