//! Error types for the debug console
//!
//! Every variant renders a reason an operator can act on: invalid hex,
//! unsupported mapper, device not responding and so on. Nothing here is
//! retried automatically.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::packet::Opcode;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug console
#[derive(Error, Debug)]
pub enum Error {
    // === Codec Errors ===
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // === Transport Errors ===
    #[error("Short write: sent {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Short read: received {actual} of {expected} bytes (device not responding?)")]
    ShortRead { expected: usize, actual: usize },

    #[error("Failed to open '{port}': {reason}")]
    TransportOpen { port: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Device Errors ===
    #[error("Device not responding: sent {sent:02X?}, received {received:02X?}")]
    HandshakeFailed { sent: Vec<u8>, received: Vec<u8> },

    #[error("Device did not halt within {} ms", .0.as_millis())]
    HaltTimeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    // === Script Errors ===
    #[error("Script usage error: {0}")]
    ScriptUsage(String),

    #[error("Script engine error: {0}")]
    ScriptEngine(String),

    #[error("Failed to load script '{path}': {reason}")]
    ScriptLoad { path: String, reason: String },

    // === Image Errors ===
    #[error("Invalid ROM image: {0}")]
    ImageValidation(#[from] ImageError),

    #[error("Invalid program image '{path}': {reason}")]
    AsmImage { path: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of the byte stream itself
    ///
    /// These are fatal to the in-flight command; the link offers no way to
    /// resynchronize, so callers should not issue follow-up commands blindly.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ShortWrite { .. }
                | Error::ShortRead { .. }
                | Error::TransportOpen { .. }
                | Error::Io(_)
        )
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a script load error
    pub fn script_load(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::ScriptLoad {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Rejections of a single packet, binary or hex text
///
/// These are recoverable: the input is dropped and the session stays live.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed hex: invalid character '{character}' at position {position}")]
    MalformedHex { position: usize, character: char },

    #[error("Malformed hex: odd number of hex digits ({0})")]
    OddDigitCount(usize),

    #[error("Empty packet: no opcode byte")]
    Empty,

    #[error("Unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("Truncated {opcode} packet: need {expected} bytes, got {actual}")]
    TruncatedPayload {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid CPU register selector 0x{0:02X}")]
    InvalidRegister(u8),

    #[error("{0} cannot be entered as raw hex (only Echo, CpuMemRead and CpuMemWrite)")]
    UnsupportedInConsole(Opcode),

    #[error("Payload of {0} bytes exceeds the 65535 byte limit")]
    PayloadTooLarge(usize),
}

impl DecodeError {
    /// True for the two hex-text failures (bad character, odd digit count)
    pub fn is_malformed_hex(&self) -> bool {
        matches!(
            self,
            DecodeError::MalformedHex { .. } | DecodeError::OddDigitCount(_)
        )
    }
}

/// Reasons an iNES image is refused before any byte reaches the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Invalid ROM header (expected 'NES\\x1A' signature)")]
    BadSignature,

    #[error("Too many ROM banks: {0} program banks (at most 2 supported)")]
    TooManyProgramBanks(u8),

    #[error("Too many ROM banks: {0} graphics banks (at most 1 supported)")]
    TooManyGraphicsBanks(u8),

    #[error("Image declares no program banks")]
    NoProgramBanks,

    #[error("Only horizontal and vertical mirroring are supported")]
    UnsupportedMirroring,

    #[error("Only mapper 0 is supported (image uses mapper {0})")]
    UnsupportedMapper(u8),

    #[error("Image truncated: need {expected} bytes, file has {actual}")]
    Truncated { expected: usize, actual: usize },
}
