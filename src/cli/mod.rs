pub mod commands;

use crate::config::KitOptions;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ebpfkit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect the probe graphs built for this host", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "YAML file replacing the option flags")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub options: KitOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Build the probe graphs and print them")]
    Plan {
        #[arg(short, long, value_enum, default_value_t = GraphSelect::All, help = "Graph to print")]
        graph: GraphSelect,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
        format: OutputFormat,
    },
    #[command(about = "Print the host introspection result")]
    Env {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphSelect {
    Bootstrap,
    Main,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "ebpfkit",
            "--disable-network",
            "plan",
            "--graph",
            "main",
            "--format",
            "yaml",
        ])
        .unwrap();
        assert!(cli.options.disable_network);
        match cli.command {
            Some(Commands::Plan { graph, format }) => {
                assert_eq!(graph, GraphSelect::Main);
                assert_eq!(format, OutputFormat::Yaml);
            }
            _ => panic!("expected plan"),
        }
    }

    #[test]
    fn test_defaults_match_options() {
        let cli = Cli::try_parse_from(["ebpfkit", "env"]).unwrap();
        assert_eq!(cli.options, KitOptions::default());
        assert!(cli.config.is_none());
    }
}
