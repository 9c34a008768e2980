//! nesdbg - host-side debug console for the FPGA NES
//!
//! Talks to the debug block over a serial link: raw packets, memory and
//! register access, ROM loading and scripted test batches.

use std::path::PathBuf;

use clap::Parser;
use nesdbg::cli::{self, Outcome, Session};
use nesdbg::commands::Commands;
use nesdbg::common::config::Config;
use nesdbg::common::logging;

#[derive(Parser)]
#[command(name = "nesdbg", about = "Debug console for the FPGA NES")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file
    #[arg(long, global = true)]
    port: Option<String>,

    /// Use an in-process simulated device instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Test {
            verbose,
            log_file: true,
            ..
        } => {
            if let Some(path) = logging::init_with_file(*verbose) {
                tracing::info!(path = %path.display(), "Logging to file");
            }
        }
        Commands::Test { verbose, .. } => logging::init_cli(*verbose),
        _ => logging::init_cli(false),
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.serial.port = port;
    }

    let session = Session {
        config,
        simulate: cli.simulate,
    };

    match cli::dispatch(cli.command, session).await {
        Ok(Outcome::Success) => {}
        Ok(Outcome::TestsFailed) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
