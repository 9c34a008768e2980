//! Debug packet wire codec
//!
//! Binary layout, opcode first, multi-byte fields little-endian:
//! ```text
//! Echo          00 | count:u16 | data[count]
//! CpuMemRead    01 | addr:u16  | count:u16
//! CpuMemWrite   02 | addr:u16  | count:u16 | data[count]
//! CpuRegRead    05 | reg:u8
//! CpuRegWrite   06 | reg:u8    | value:u8
//! CartSetConfig 0C | config[5]
//! ```
//! Operators may also type packets as hex text, e.g. `01 00 80 10 00`.

use crate::common::error::DecodeError;

use super::types::{CpuReg, Opcode, Packet, Payload, CART_CONFIG_LEN};

/// Encode a packet into the exact bytes sent to the device
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet.size_in_bytes());
    out.push(packet.opcode().byte());

    match packet {
        Packet::Echo { data } => {
            out.extend_from_slice(&data.count().to_le_bytes());
            out.extend_from_slice(data.as_bytes());
        }
        Packet::CpuMemRead { addr, count } | Packet::PpuMemRead { addr, count } => {
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
        }
        Packet::CpuMemWrite { addr, data } | Packet::PpuMemWrite { addr, data } => {
            out.extend_from_slice(&addr.to_le_bytes());
            out.extend_from_slice(&data.count().to_le_bytes());
            out.extend_from_slice(data.as_bytes());
        }
        Packet::CpuRegRead { reg } => out.push(reg.byte()),
        Packet::CpuRegWrite { reg, value } => {
            out.push(reg.byte());
            out.push(*value);
        }
        Packet::CartridgeSetConfig { config } => out.extend_from_slice(config),
        Packet::DebugHalt | Packet::DebugRun | Packet::QueryHalted | Packet::PpuDisable => {}
    }

    debug_assert_eq!(out.len(), packet.size_in_bytes());
    out
}

/// Decode one packet from the front of `bytes`
///
/// Returns the packet and the number of bytes it occupied, so a stream of
/// back-to-back packets can be split.
pub fn decode_prefix(bytes: &[u8]) -> Result<(Packet, usize), DecodeError> {
    let Some(&first) = bytes.first() else {
        return Err(DecodeError::Empty);
    };
    let opcode = Opcode::try_from(first)?;

    let header = opcode.header_len();
    need(opcode, bytes, header)?;

    let le16 = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

    let packet = match opcode {
        Opcode::Echo => {
            let count = le16(1) as usize;
            need(opcode, bytes, header + count)?;
            Packet::Echo {
                data: payload(&bytes[header..header + count])?,
            }
        }
        Opcode::CpuMemRead => Packet::CpuMemRead {
            addr: le16(1),
            count: le16(3),
        },
        Opcode::PpuMemRead => Packet::PpuMemRead {
            addr: le16(1),
            count: le16(3),
        },
        Opcode::CpuMemWrite | Opcode::PpuMemWrite => {
            let addr = le16(1);
            let count = le16(3) as usize;
            need(opcode, bytes, header + count)?;
            let data = payload(&bytes[header..header + count])?;
            if opcode == Opcode::CpuMemWrite {
                Packet::CpuMemWrite { addr, data }
            } else {
                Packet::PpuMemWrite { addr, data }
            }
        }
        Opcode::DebugHalt => Packet::DebugHalt,
        Opcode::DebugRun => Packet::DebugRun,
        Opcode::QueryHalted => Packet::QueryHalted,
        Opcode::PpuDisable => Packet::PpuDisable,
        Opcode::CpuRegRead => Packet::CpuRegRead {
            reg: CpuReg::try_from(bytes[1])?,
        },
        Opcode::CpuRegWrite => Packet::CpuRegWrite {
            reg: CpuReg::try_from(bytes[1])?,
            value: bytes[2],
        },
        Opcode::CartridgeSetConfig => {
            let mut config = [0u8; CART_CONFIG_LEN];
            config.copy_from_slice(&bytes[1..header]);
            Packet::CartridgeSetConfig { config }
        }
    };

    let used = packet.size_in_bytes();
    Ok((packet, used))
}

/// Decode a whole buffer as a single packet
///
/// Bytes past the packet's layout are ignored.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let (packet, used) = decode_prefix(bytes)?;
    if used < bytes.len() {
        tracing::warn!(
            packet = %packet,
            ignored = bytes.len() - used,
            "Ignoring bytes past end of packet"
        );
    }
    Ok(packet)
}

/// Parse operator hex text into raw bytes
///
/// Digits are case-insensitive, spaces separate pairs, anything else is
/// rejected. Digits pair up regardless of where the spaces fall.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let mut bytes = Vec::with_capacity(text.len() / 2);
    let mut digits = 0usize;

    for (position, character) in text.chars().enumerate() {
        if character == ' ' {
            continue;
        }
        let nibble = character
            .to_digit(16)
            .ok_or(DecodeError::MalformedHex {
                position,
                character,
            })? as u8;

        if digits % 2 == 0 {
            bytes.push(nibble << 4);
        } else if let Some(last) = bytes.last_mut() {
            *last |= nibble;
        }
        digits += 1;
    }

    if digits % 2 != 0 {
        return Err(DecodeError::OddDigitCount(digits));
    }
    Ok(bytes)
}

/// Decode a packet typed into the raw console
///
/// Only Echo, CpuMemRead and CpuMemWrite are accepted unless
/// `allow_all_opcodes` lifts the restriction.
pub fn decode_hex_command(text: &str, allow_all_opcodes: bool) -> Result<Packet, DecodeError> {
    let bytes = parse_hex(text)?;
    let packet = decode(&bytes)?;

    if !allow_all_opcodes && !packet.opcode().is_console_decodable() {
        return Err(DecodeError::UnsupportedInConsole(packet.opcode()));
    }
    Ok(packet)
}

/// Render bytes as uppercase space-separated hex pairs
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn need(opcode: Opcode, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::TruncatedPayload {
            opcode,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn payload(bytes: &[u8]) -> Result<Payload, DecodeError> {
    Payload::try_from(bytes)
}
