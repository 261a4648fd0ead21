use clap::Parser;
use ebpfkit::cli::{commands, Cli};
use std::process;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        process::exit(1);
    }

    debug!("Starting ebpfkit v{}", ebpfkit::VERSION);

    let result = match cli.command {
        Some(command) => commands::handle_command(command, cli.options, cli.config.as_deref()),
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
