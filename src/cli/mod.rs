//! CLI command handling
//!
//! Device I/O is blocking, so every command talks to the device from a
//! `spawn_blocking` worker. The async side only prints and reports progress.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::commands::Commands;
use crate::common::config::{Config, SerialConfig};
use crate::common::{Error, Result};
use crate::device::{self, CancelToken, DeviceClient, RomImage, WaitOptions};
use crate::packet::{self, CpuReg};
use crate::script::{BridgeOptions, ScriptBridge};
use crate::testing::{self, RunEvent, RunReport, ScriptResult, ScriptSource, TestSuite};
use crate::transport::SimulatedDevice;

/// Settings resolved from flags and the config file
pub struct Session {
    pub config: Config,
    /// Talk to an in-process simulated device instead of the serial port
    pub simulate: bool,
}

/// How a successful dispatch should exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A test batch finished but not every script passed
    TestsFailed,
}

/// Open the device named by the session and complete the handshake
fn connect(serial: &SerialConfig, simulate: bool) -> Result<DeviceClient> {
    if simulate {
        let mut client = DeviceClient::new(SimulatedDevice::new());
        client.handshake()?;
        Ok(client)
    } else {
        DeviceClient::open_serial(serial)
    }
}

/// Run `f` against a freshly connected device on a blocking worker
async fn with_device<T, F>(session: &Session, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut DeviceClient) -> Result<T> + Send + 'static,
{
    let serial = session.config.serial.clone();
    let simulate = session.simulate;
    tokio::task::spawn_blocking(move || {
        let mut client = connect(&serial, simulate)?;
        f(&mut client)
    })
    .await
    .map_err(|e| Error::Internal(format!("Device worker failed: {}", e)))?
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, session: Session) -> Result<Outcome> {
    match command {
        Commands::Ping => {
            with_device(&session, |_| Ok(())).await?;
            println!("{} Device responded to handshake", "✓".green());
            Ok(Outcome::Success)
        }

        Commands::Raw { hex } => {
            let allow_all = session.config.console.allow_all_opcodes;
            if hex.is_empty() {
                with_device(&session, move |client| raw_console(client, allow_all)).await?;
            } else {
                let packet = packet::decode_hex_command(&hex.join(" "), allow_all)?;
                let response = with_device(&session, move |client| client.execute(&packet)).await?;
                print_response(&response);
            }
            Ok(Outcome::Success)
        }

        Commands::LoadRom { path } => {
            // Validate before opening the link so a bad image sends nothing
            let image = RomImage::load(&path)?;
            let chunk_size = session.config.rom.chunk_size;

            let pb = ProgressBar::new(image.transfer_size() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .map_err(|e| Error::Internal(e.to_string()))?
                    .progress_chars("=> "),
            );

            let bar = pb.clone();
            let result = with_device(&session, move |client| {
                device::load_rom(client, &image, chunk_size, |progress| {
                    bar.set_position(progress.transferred as u64);
                })
            })
            .await;
            pb.finish_and_clear();
            result?;

            println!("{} Loaded {}", "✓".green(), path.display());
            Ok(Outcome::Success)
        }

        Commands::Test {
            scripts,
            suite,
            json,
            verbose,
            log_file: _,
        } => run_tests(&session, scripts, suite, json, verbose).await,

        Commands::List => {
            let scripts = testing::discover_scripts(&session.config.scripts.dir)?;
            if scripts.is_empty() {
                println!(
                    "No scripts found in {}",
                    session.config.scripts.dir.display()
                );
            } else {
                for script in &scripts {
                    println!("{}", script.name);
                }
            }
            Ok(Outcome::Success)
        }

        Commands::Halt => {
            with_device(&session, |client| client.halt()).await?;
            println!("CPU halted");
            Ok(Outcome::Success)
        }

        Commands::Run => {
            with_device(&session, |client| client.run()).await?;
            println!("CPU running");
            Ok(Outcome::Success)
        }

        Commands::Regs => {
            let values = with_device(&session, |client| {
                let mut values = Vec::with_capacity(CpuReg::ALL.len());
                for reg in CpuReg::ALL {
                    values.push((reg, client.cpu_reg_read(reg)?));
                }
                Ok(values)
            })
            .await?;

            for (reg, value) in &values {
                println!("{:>3} = ${:02X}", reg.name(), value);
            }
            Ok(Outcome::Success)
        }

        Commands::Peek { addr, count, ppu } => {
            let data = with_device(&session, move |client| {
                if ppu {
                    client.ppu_mem_read(addr, count)
                } else {
                    client.cpu_mem_read(addr, count)
                }
            })
            .await?;

            let space = if ppu { "PPU" } else { "CPU" };
            println!("{} memory at ${:04X}:", space, addr);
            print_memory(addr, &data);
            Ok(Outcome::Success)
        }

        Commands::Poke { addr, bytes, ppu } => {
            let len = bytes.len();
            with_device(&session, move |client| {
                if ppu {
                    client.ppu_mem_write(addr, bytes)
                } else {
                    client.cpu_mem_write(addr, bytes)
                }
            })
            .await?;

            println!("Wrote {} bytes at ${:04X}", len, addr);
            Ok(Outcome::Success)
        }
    }
}

async fn run_tests(
    session: &Session,
    names: Vec<String>,
    suite: Option<PathBuf>,
    json: bool,
    verbose: bool,
) -> Result<Outcome> {
    let script_dir = &session.config.scripts.dir;
    let scripts: Vec<ScriptSource> = if let Some(path) = suite {
        let suite = TestSuite::load(&path)?;
        if !json {
            println!(
                "\n{} {}",
                "Running Suite:".blue().bold(),
                suite.name.white().bold()
            );
            if let Some(desc) = &suite.description {
                println!("  {}", desc.dimmed());
            }
        }
        suite.sources(script_dir)
    } else if names.is_empty() {
        testing::discover_scripts(script_dir)?
    } else {
        names
            .iter()
            .map(|name| testing::resolve_script(script_dir, name))
            .collect()
    };

    if scripts.is_empty() {
        return Err(Error::Config(format!(
            "No test scripts found in {}",
            script_dir.display()
        )));
    }

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling test run");
            on_interrupt.cancel();
        }
    });

    let options = BridgeOptions {
        asm_dir: session.config.scripts.asm_dir.clone(),
        wait: WaitOptions::from_config(&session.config.polling, cancel),
    };
    let serial = session.config.serial.clone();
    let simulate = session.simulate;
    let make_executor = move || -> Result<ScriptBridge> {
        let client = connect(&serial, simulate)?;
        Ok(ScriptBridge::with_client(client, options))
    };

    let pb = if json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(scripts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|e| Error::Internal(e.to_string()))?
                .progress_chars("=> "),
        );
        pb
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bar = pb.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::ScriptStarted { name, .. } => bar.set_message(name),
                RunEvent::ScriptFinished { entry, done, total } => {
                    bar.set_position(done as u64);
                    tracing::debug!("{}", testing::progress_line(done, total));
                    if !json && (verbose || entry.result != ScriptResult::Pass) {
                        bar.suspend(|| print!("{}", entry.output));
                    }
                }
                RunEvent::Started { .. } | RunEvent::Completed { .. } => {}
            }
        }
    });

    let report = testing::run_in_background(make_executor, scripts, tx).await;
    let _ = printer.await;
    pb.finish_and_clear();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.all_passed() {
        Outcome::Success
    } else {
        Outcome::TestsFailed
    })
}

/// Line-oriented raw packet console on stdin
fn raw_console(client: &mut DeviceClient, allow_all: bool) -> Result<()> {
    println!("Enter packets as hex pairs (e.g. 01 00 80 10 00). 'clear' clears, 'quit' exits.");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let line = line.trim();

        match line {
            "" => continue,
            "quit" | "exit" => break,
            "clear" => {
                print!("\x1B[2J\x1B[H");
                continue;
            }
            _ => {}
        }

        let packet = match packet::decode_hex_command(line, allow_all) {
            Ok(packet) => packet,
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                continue;
            }
        };

        println!("TX: {}", packet::format_hex(&packet::encode(&packet)));
        match client.execute(&packet) {
            Ok(response) => print_response(&response),
            Err(e) => println!("{} {}", "✗".red(), e),
        }
    }
    Ok(())
}

fn print_response(response: &[u8]) {
    if response.is_empty() {
        println!("RX: (no response bytes)");
    } else {
        println!("RX: {}", packet::format_hex(response));
    }
}

fn print_report(report: &RunReport) {
    println!();
    for entry in &report.entries {
        println!("  {} {}", entry.result.colored(), entry.name);
    }

    let summary = report.summary_line();
    println!(
        "\n{}\n",
        if report.all_passed() {
            summary.green().bold()
        } else {
            summary.red().bold()
        }
    );
}

/// Hex dump with absolute addresses, 16 bytes per row
fn print_memory(base: u16, data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        let offset = base.wrapping_add((i * 16) as u16);
        print!("{:04X}  ", offset);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Padding for incomplete lines
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            if *byte >= 0x20 && *byte < 0x7f {
                print!("{}", *byte as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }
}
