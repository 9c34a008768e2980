//! Debug packet catalogue
//!
//! One variant per opcode. Multi-byte fields travel little-endian; the first
//! byte of every packet is its opcode.

use std::fmt;

use serde::Serialize;

use crate::common::error::DecodeError;

/// Opcode byte selecting a packet's layout
///
/// `0x08` (query error code) exists in the device's enumeration but has no
/// packet layout on the host side; it decodes as an unknown opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    Echo = 0x00,
    CpuMemRead = 0x01,
    CpuMemWrite = 0x02,
    DebugHalt = 0x03,
    DebugRun = 0x04,
    CpuRegRead = 0x05,
    CpuRegWrite = 0x06,
    QueryHalted = 0x07,
    PpuMemRead = 0x09,
    PpuMemWrite = 0x0A,
    PpuDisable = 0x0B,
    CartridgeSetConfig = 0x0C,
}

/// Reserved by the device for an error-code query; never issued by the host
pub const RESERVED_QUERY_ERROR_CODE: u8 = 0x08;

impl Opcode {
    pub const ALL: [Opcode; 12] = [
        Opcode::Echo,
        Opcode::CpuMemRead,
        Opcode::CpuMemWrite,
        Opcode::DebugHalt,
        Opcode::DebugRun,
        Opcode::CpuRegRead,
        Opcode::CpuRegWrite,
        Opcode::QueryHalted,
        Opcode::PpuMemRead,
        Opcode::PpuMemWrite,
        Opcode::PpuDisable,
        Opcode::CartridgeSetConfig,
    ];

    /// Raw opcode byte
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Bytes of the fixed part of the layout, opcode included
    ///
    /// Length-prefixed packets (Echo and the memory writes) additionally carry
    /// `count` data bytes after this header.
    pub fn header_len(self) -> usize {
        match self {
            Opcode::Echo => 3,
            Opcode::CpuMemRead | Opcode::PpuMemRead => 5,
            Opcode::CpuMemWrite | Opcode::PpuMemWrite => 5,
            Opcode::DebugHalt | Opcode::DebugRun | Opcode::QueryHalted | Opcode::PpuDisable => 1,
            Opcode::CpuRegRead => 2,
            Opcode::CpuRegWrite => 3,
            Opcode::CartridgeSetConfig => 1 + CART_CONFIG_LEN,
        }
    }

    /// Whether an operator may type this packet into the raw console
    pub fn is_console_decodable(self) -> bool {
        matches!(
            self,
            Opcode::Echo | Opcode::CpuMemRead | Opcode::CpuMemWrite
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.byte() == byte)
            .ok_or(DecodeError::UnknownOpcode(byte))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Echo => "Echo",
            Opcode::CpuMemRead => "CpuMemRead",
            Opcode::CpuMemWrite => "CpuMemWrite",
            Opcode::DebugHalt => "DebugHalt",
            Opcode::DebugRun => "DebugRun",
            Opcode::CpuRegRead => "CpuRegRead",
            Opcode::CpuRegWrite => "CpuRegWrite",
            Opcode::QueryHalted => "QueryHalted",
            Opcode::PpuMemRead => "PpuMemRead",
            Opcode::PpuMemWrite => "PpuMemWrite",
            Opcode::PpuDisable => "PpuDisable",
            Opcode::CartridgeSetConfig => "CartridgeSetConfig",
        };
        f.write_str(name)
    }
}

/// CPU register selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CpuReg {
    /// Program counter, low byte
    Pcl = 0x00,
    /// Program counter, high byte
    Pch = 0x01,
    /// Accumulator
    Ac = 0x02,
    X = 0x03,
    Y = 0x04,
    /// Processor status
    P = 0x05,
    /// Stack pointer
    S = 0x06,
}

impl CpuReg {
    pub const ALL: [CpuReg; 7] = [
        CpuReg::Pcl,
        CpuReg::Pch,
        CpuReg::Ac,
        CpuReg::X,
        CpuReg::Y,
        CpuReg::P,
        CpuReg::S,
    ];

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Short name as exposed to scripts
    pub fn name(self) -> &'static str {
        match self {
            CpuReg::Pcl => "PCL",
            CpuReg::Pch => "PCH",
            CpuReg::Ac => "AC",
            CpuReg::X => "X",
            CpuReg::Y => "Y",
            CpuReg::P => "P",
            CpuReg::S => "S",
        }
    }
}

impl TryFrom<u8> for CpuReg {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        CpuReg::ALL
            .into_iter()
            .find(|reg| reg.byte() == byte)
            .ok_or(DecodeError::InvalidRegister(byte))
    }
}

impl fmt::Display for CpuReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of mapper configuration bytes carried by CartridgeSetConfig
pub const CART_CONFIG_LEN: usize = 5;

/// Data bytes whose length fits the 16-bit count field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub const MAX_LEN: usize = u16::MAX as usize;

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length as carried in the count field
    pub fn count(&self) -> u16 {
        // Bounded by MAX_LEN at construction
        self.0.len() as u16
    }
}

impl TryFrom<Vec<u8>> for Payload {
    type Error = DecodeError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() > Self::MAX_LEN {
            return Err(DecodeError::PayloadTooLarge(bytes.len()));
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for Payload {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(bytes.to_vec())
    }
}

/// A debug command packet
///
/// Immutable once built; the executor consumes it once and drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Device echoes the payload back verbatim
    Echo { data: Payload },
    CpuMemRead { addr: u16, count: u16 },
    CpuMemWrite { addr: u16, data: Payload },
    DebugHalt,
    DebugRun,
    CpuRegRead { reg: CpuReg },
    CpuRegWrite { reg: CpuReg, value: u8 },
    /// Response byte is 0 while running, nonzero once halted
    QueryHalted,
    PpuMemRead { addr: u16, count: u16 },
    PpuMemWrite { addr: u16, data: Payload },
    PpuDisable,
    /// iNES header bytes 4..=8
    CartridgeSetConfig { config: [u8; CART_CONFIG_LEN] },
}

impl Packet {
    pub fn echo(data: impl Into<Vec<u8>>) -> Result<Self, DecodeError> {
        Ok(Packet::Echo {
            data: Payload::try_from(data.into())?,
        })
    }

    pub fn cpu_mem_write(addr: u16, data: impl Into<Vec<u8>>) -> Result<Self, DecodeError> {
        Ok(Packet::CpuMemWrite {
            addr,
            data: Payload::try_from(data.into())?,
        })
    }

    pub fn ppu_mem_write(addr: u16, data: impl Into<Vec<u8>>) -> Result<Self, DecodeError> {
        Ok(Packet::PpuMemWrite {
            addr,
            data: Payload::try_from(data.into())?,
        })
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Echo { .. } => Opcode::Echo,
            Packet::CpuMemRead { .. } => Opcode::CpuMemRead,
            Packet::CpuMemWrite { .. } => Opcode::CpuMemWrite,
            Packet::DebugHalt => Opcode::DebugHalt,
            Packet::DebugRun => Opcode::DebugRun,
            Packet::CpuRegRead { .. } => Opcode::CpuRegRead,
            Packet::CpuRegWrite { .. } => Opcode::CpuRegWrite,
            Packet::QueryHalted => Opcode::QueryHalted,
            Packet::PpuMemRead { .. } => Opcode::PpuMemRead,
            Packet::PpuMemWrite { .. } => Opcode::PpuMemWrite,
            Packet::PpuDisable => Opcode::PpuDisable,
            Packet::CartridgeSetConfig { .. } => Opcode::CartridgeSetConfig,
        }
    }

    /// Total encoded size: the opcode byte plus every argument field
    pub fn size_in_bytes(&self) -> usize {
        let header = self.opcode().header_len();
        match self {
            Packet::Echo { data }
            | Packet::CpuMemWrite { data, .. }
            | Packet::PpuMemWrite { data, .. } => header + data.len(),
            _ => header,
        }
    }

    /// Bytes the device sends back for this packet
    ///
    /// Depends only on the opcode and, for reads and echo, the requested count.
    pub fn response_len(&self) -> usize {
        match self {
            Packet::Echo { data } => data.len(),
            Packet::CpuMemRead { count, .. } | Packet::PpuMemRead { count, .. } => *count as usize,
            Packet::CpuRegRead { .. } | Packet::QueryHalted => 1,
            Packet::CpuMemWrite { .. }
            | Packet::PpuMemWrite { .. }
            | Packet::DebugHalt
            | Packet::DebugRun
            | Packet::CpuRegWrite { .. }
            | Packet::PpuDisable
            | Packet::CartridgeSetConfig { .. } => 0,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Echo { data } => write!(f, "Echo({} bytes)", data.len()),
            Packet::CpuMemRead { addr, count } => {
                write!(f, "CpuMemRead(${:04X}, {})", addr, count)
            }
            Packet::CpuMemWrite { addr, data } => {
                write!(f, "CpuMemWrite(${:04X}, {} bytes)", addr, data.len())
            }
            Packet::PpuMemRead { addr, count } => {
                write!(f, "PpuMemRead(${:04X}, {})", addr, count)
            }
            Packet::PpuMemWrite { addr, data } => {
                write!(f, "PpuMemWrite(${:04X}, {} bytes)", addr, data.len())
            }
            Packet::CpuRegRead { reg } => write!(f, "CpuRegRead({})", reg),
            Packet::CpuRegWrite { reg, value } => {
                write!(f, "CpuRegWrite({}, ${:02X})", reg, value)
            }
            Packet::CartridgeSetConfig { config } => {
                write!(f, "CartridgeSetConfig({:02X?})", config)
            }
            other => write!(f, "{}", other.opcode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_byte() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.byte()).unwrap(), op);
        }
        assert_eq!(
            Opcode::try_from(RESERVED_QUERY_ERROR_CODE),
            Err(DecodeError::UnknownOpcode(0x08))
        );
        assert_eq!(Opcode::try_from(0xFF), Err(DecodeError::UnknownOpcode(0xFF)));
    }

    #[test]
    fn test_register_selectors() {
        assert_eq!(CpuReg::try_from(0x06).unwrap(), CpuReg::S);
        assert_eq!(CpuReg::try_from(0x07), Err(DecodeError::InvalidRegister(0x07)));
        assert_eq!(CpuReg::Ac.name(), "AC");
    }

    #[test]
    fn test_response_lengths() {
        let cases = [
            (Packet::echo(vec![1, 2, 3]).unwrap(), 3),
            (Packet::CpuMemRead { addr: 0x8000, count: 16 }, 16),
            (Packet::cpu_mem_write(0x0200, vec![0; 8]).unwrap(), 0),
            (Packet::DebugHalt, 0),
            (Packet::DebugRun, 0),
            (Packet::CpuRegRead { reg: CpuReg::X }, 1),
            (Packet::CpuRegWrite { reg: CpuReg::X, value: 4 }, 0),
            (Packet::QueryHalted, 1),
            (Packet::PpuMemRead { addr: 0x2000, count: 0x400 }, 0x400),
            (Packet::ppu_mem_write(0, vec![0; 4]).unwrap(), 0),
            (Packet::PpuDisable, 0),
            (Packet::CartridgeSetConfig { config: [1, 1, 0, 0, 0] }, 0),
        ];

        for (packet, expected) in cases {
            assert_eq!(packet.response_len(), expected, "{}", packet);
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(Packet::echo(b"NES\0".to_vec()).unwrap().size_in_bytes(), 7);
        assert_eq!(Packet::CpuMemRead { addr: 0, count: 0 }.size_in_bytes(), 5);
        assert_eq!(Packet::cpu_mem_write(0, vec![0; 1024]).unwrap().size_in_bytes(), 1029);
        assert_eq!(Packet::QueryHalted.size_in_bytes(), 1);
        assert_eq!(Packet::CpuRegWrite { reg: CpuReg::Pcl, value: 0 }.size_in_bytes(), 3);
        assert_eq!(Packet::CartridgeSetConfig { config: [0; 5] }.size_in_bytes(), 6);
    }

    #[test]
    fn test_payload_limit() {
        assert!(Payload::try_from(vec![0u8; Payload::MAX_LEN]).is_ok());
        assert_eq!(
            Payload::try_from(vec![0u8; Payload::MAX_LEN + 1]),
            Err(DecodeError::PayloadTooLarge(Payload::MAX_LEN + 1))
        );
    }
}
