//! CLI command definitions
//!
//! Defines the clap commands for the debug console.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the device answers the liveness handshake
    Ping,

    /// Send raw hex packets (interactive console when no packet is given)
    ///
    /// Example: `nesdbg raw 01 00 80 10 00` reads 16 bytes at $8000
    Raw {
        /// Packet as space-separated hex pairs
        hex: Vec<String>,
    },

    /// Validate an iNES image and load it onto the device
    #[command(name = "load-rom")]
    LoadRom {
        /// Path to the .nes file
        path: PathBuf,
    },

    /// Run test scripts and print a report
    Test {
        /// Script names (default: every script in the script directory)
        scripts: Vec<String>,

        /// YAML suite file listing scripts to run
        #[arg(long, conflicts_with = "scripts")]
        suite: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Show every script's output, not only failures
        #[arg(long, short)]
        verbose: bool,

        /// Also write a detailed log under the data directory
        #[arg(long)]
        log_file: bool,
    },

    /// List scripts found in the script directory
    List,

    /// Halt the CPU
    Halt,

    /// Resume the CPU
    Run,

    /// Print all CPU registers
    Regs,

    /// Read memory and print a hex dump
    Peek {
        /// Start address (decimal, 0x or $ hex)
        #[arg(value_parser = parse_u16)]
        addr: u16,

        /// Number of bytes
        #[arg(default_value = "16", value_parser = parse_u16)]
        count: u16,

        /// Read PPU memory instead of CPU memory
        #[arg(long)]
        ppu: bool,
    },

    /// Write bytes to memory
    Poke {
        /// Start address (decimal, 0x or $ hex)
        #[arg(value_parser = parse_u16)]
        addr: u16,

        /// Bytes to write
        #[arg(required = true, value_parser = parse_u8)]
        bytes: Vec<u8>,

        /// Write PPU memory instead of CPU memory
        #[arg(long)]
        ppu: bool,
    },
}

fn parse_u16(text: &str) -> Result<u16, String> {
    crate::common::parse_number(text)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| format!("'{}' is not a 16-bit number", text))
}

fn parse_u8(text: &str) -> Result<u8, String> {
    crate::common::parse_number(text)
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| format!("'{}' is not a byte value", text))
}
