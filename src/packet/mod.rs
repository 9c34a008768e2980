//! Debug packet protocol
//!
//! Typed packets for every command the FPGA debug block understands, plus
//! the codec that turns them into wire bytes and parses operator hex text.

pub mod codec;
pub mod types;

pub use codec::{decode, decode_hex_command, encode, format_hex, parse_hex};
pub use types::*;
