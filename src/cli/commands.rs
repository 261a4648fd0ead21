use crate::cli::{Commands, GraphSelect, OutputFormat};
use crate::config::{resolve, KitOptions};
use crate::env::{select_interface, HostEnvironment};
use crate::orchestrator::{build_bootstrap, build_main, BuildInputs, ProbeGraph};
use crate::Result;
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub fn handle_command(command: Commands, flags: KitOptions, config: Option<&Path>) -> Result<()> {
    let options = resolve(flags, config)?;
    match command {
        Commands::Plan { graph, format } => handle_plan(options, graph, format),
        Commands::Env { format } => handle_env(options, format),
    }
}

fn handle_plan(options: KitOptions, select: GraphSelect, format: OutputFormat) -> Result<()> {
    let inputs = BuildInputs::gather(options)?;
    let graphs = plan(&inputs, select)?;
    for graph in &graphs {
        info!(
            "{} graph: {} probes, {} maps, {} tail calls",
            graph.kind,
            graph.probes.len(),
            graph.maps.len(),
            graph.routes.len()
        );
    }
    println!("{}", render(&graphs, format)?);
    Ok(())
}

/// Graphs selected for printing, bootstrap first
pub fn plan(inputs: &BuildInputs, select: GraphSelect) -> Result<Vec<ProbeGraph>> {
    let mut graphs = Vec::new();
    if matches!(select, GraphSelect::Bootstrap | GraphSelect::All) {
        graphs.push(build_bootstrap(inputs)?);
    }
    if matches!(select, GraphSelect::Main | GraphSelect::All) {
        graphs.push(build_main(inputs)?);
    }
    Ok(graphs)
}

#[derive(Debug, Serialize)]
pub struct EnvReport {
    pub host: HostEnvironment,
    pub ingress_ifname: String,
    pub egress_ifname: String,
}

impl EnvReport {
    pub fn new(host: HostEnvironment, options: &KitOptions) -> Self {
        let ingress_ifname = select_interface(
            &host.interfaces,
            &options.ingress_ifname,
            &options.interface_prefix,
        );
        let egress_ifname = select_interface(
            &host.interfaces,
            &options.egress_ifname,
            &options.interface_prefix,
        );
        Self {
            host,
            ingress_ifname,
            egress_ifname,
        }
    }
}

fn handle_env(options: KitOptions, format: OutputFormat) -> Result<()> {
    let host = HostEnvironment::detect(&options);
    let report = EnvReport::new(host, &options);
    println!("{}", render(&report, format)?);
    Ok(())
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    let out = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::NetInterface;
    use crate::orchestrator::GraphKind;

    fn inputs() -> BuildInputs {
        BuildInputs {
            options: KitOptions::default(),
            host: HostEnvironment {
                interfaces: vec![NetInterface::new("eth1", true, false)],
                docker_present: false,
                postgres_present: false,
                webapp_present: false,
            },
            pid: 10,
            exe_hash: 20,
        }
    }

    #[test]
    fn test_plan_selection() {
        let all = plan(&inputs(), GraphSelect::All).unwrap();
        let kinds: Vec<_> = all.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![GraphKind::Bootstrap, GraphKind::Main]);

        let main = plan(&inputs(), GraphSelect::Main).unwrap();
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].kind, GraphKind::Main);
    }

    #[test]
    fn test_render_json_and_yaml() {
        let graphs = plan(&inputs(), GraphSelect::Bootstrap).unwrap();
        let json = render(&graphs, OutputFormat::Json).unwrap();
        assert!(json.contains("kretprobe/__x64_sys_getdents64"));
        let yaml = render(&graphs, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("BootstrapGetdents"));
    }

    #[test]
    fn test_env_report_selects_interfaces() {
        let report = EnvReport::new(inputs().host, &KitOptions::default());
        assert_eq!(report.ingress_ifname, "eth1");
        assert_eq!(report.egress_ifname, "eth1");
    }
}
