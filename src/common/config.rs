//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Script and program image locations
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Halt polling settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// ROM transfer settings
    #[serde(default)]
    pub rom: RomConfig,

    /// Raw console settings
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Parity mode for the serial link
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    None,
    #[default]
    Odd,
    Even,
}

/// Serial link settings
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Port name, e.g. `/dev/ttyUSB0` or `COM5`
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default)]
    pub parity: ParitySetting,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Per-call read and write timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause after opening the port before the handshake
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: ParitySetting::default(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_port() -> String {
    if cfg!(windows) {
        "COM5".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_baud_rate() -> u32 {
    38400
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_settle_ms() -> u64 {
    200
}

/// Script locations
#[derive(Debug, Deserialize, Clone)]
pub struct ScriptsConfig {
    /// Directory searched for `*.rhai` test scripts
    #[serde(default = "default_script_dir")]
    pub dir: PathBuf,

    /// Directory `LoadAsm` resolves program image names against
    #[serde(default = "default_asm_dir")]
    pub asm_dir: PathBuf,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_script_dir(),
            asm_dir: default_asm_dir(),
        }
    }
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("scripts")
}
fn default_asm_dir() -> PathBuf {
    PathBuf::from("asm/prg")
}

/// Halt polling settings
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Pause between QueryHalted polls
    #[serde(default = "default_halt_poll_interval")]
    pub halt_poll_interval_ms: u64,

    /// Give up waiting for a halt after this long (0 waits indefinitely)
    #[serde(default = "default_halt_timeout")]
    pub halt_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            halt_poll_interval_ms: default_halt_poll_interval(),
            halt_timeout_secs: default_halt_timeout(),
        }
    }
}

fn default_halt_poll_interval() -> u64 {
    10
}
fn default_halt_timeout() -> u64 {
    60
}

/// ROM transfer settings
#[derive(Debug, Deserialize, Clone)]
pub struct RomConfig {
    /// Bytes per memory-write packet during a ROM load
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    0x400
}

/// Raw console settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConsoleConfig {
    /// Accept every opcode as hex input, not only Echo and the CPU memory packets
    #[serde(default)]
    pub allow_all_opcodes: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rom.chunk_size == 0 || self.rom.chunk_size > u16::MAX as usize {
            return Err(super::Error::Config(format!(
                "rom.chunk_size must be between 1 and 65535, got {}",
                self.rom.chunk_size
            )));
        }
        if self.polling.halt_poll_interval_ms == 0 {
            return Err(super::Error::Config(
                "polling.halt_poll_interval_ms must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_link() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(config.serial.data_bits, 8);
        assert_eq!(config.serial.parity, ParitySetting::Odd);
        assert_eq!(config.serial.stop_bits, 1);
        assert_eq!(config.serial.timeout_ms, 5000);
        assert_eq!(config.serial.settle_ms, 200);
        assert_eq!(config.rom.chunk_size, 0x400);
        assert!(!config.console.allow_all_opcodes);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\nport = \"COM3\"\nparity = \"none\"\n\n[polling]\nhalt_timeout_secs = 0"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.serial.port, "COM3");
        assert_eq!(config.serial.parity, ParitySetting::None);
        assert_eq!(config.serial.baud_rate, 38400);
        assert_eq!(config.polling.halt_timeout_secs, 0);
        assert_eq!(config.polling.halt_poll_interval_ms, 10);
        assert_eq!(config.scripts.dir, PathBuf::from("scripts"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rom]\nchunk_size = 0").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(super::super::Error::Config(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nparity = \"mark\"").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(super::super::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load_from(Path::new("/nonexistent/nesdbg.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/nesdbg.toml"));
    }
}
