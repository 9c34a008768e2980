//! iNES image validation and transfer
//!
//! Only NROM-style images fit the device: mapper 0, at most two 16 KiB
//! program banks, at most one 8 KiB graphics bank, horizontal or vertical
//! mirroring. Everything is checked before the first packet goes out.

use std::path::Path;

use serde::Serialize;

use crate::common::error::ImageError;
use crate::common::{Error, Result};
use crate::packet::{CpuReg, Payload, CART_CONFIG_LEN};

use super::DeviceClient;

pub const HEADER_SIZE: usize = 16;
pub const SIGNATURE: [u8; 4] = *b"NES\x1A";
pub const PRG_BANK_SIZE: usize = 16384;
pub const CHR_BANK_SIZE: usize = 8192;

const TRAINER_SIZE: usize = 512;
const TRAINER_BIT_MASK: u8 = 0b0000_0100;
const FOUR_SCREEN_BIT_MASK: u8 = 0b0000_1000;
const MAX_PRG_BANKS: u8 = 2;
const MAX_CHR_BANKS: u8 = 1;

/// CPU address the program region is written to
pub const PRG_LOAD_ADDR: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
}

/// A validated iNES image
#[derive(Debug, Clone)]
pub struct RomImage {
    header: [u8; HEADER_SIZE],
    prg: Vec<u8>,
    chr: Vec<u8>,
}

impl RomImage {
    /// Validate and split an image held in memory
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, ImageError> {
        if bytes.len() < HEADER_SIZE || bytes[..4] != SIGNATURE {
            return Err(ImageError::BadSignature);
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);

        let prg_banks = header[4];
        let chr_banks = header[5];
        let flags_6 = header[6];
        let flags_7 = header[7];

        if prg_banks > MAX_PRG_BANKS {
            return Err(ImageError::TooManyProgramBanks(prg_banks));
        }
        if chr_banks > MAX_CHR_BANKS {
            return Err(ImageError::TooManyGraphicsBanks(chr_banks));
        }
        if prg_banks == 0 {
            return Err(ImageError::NoProgramBanks);
        }
        if flags_6 & FOUR_SCREEN_BIT_MASK != 0 {
            return Err(ImageError::UnsupportedMirroring);
        }

        let mapper = (flags_6 >> 4) | (flags_7 & 0xF0);
        if mapper != 0 {
            return Err(ImageError::UnsupportedMapper(mapper));
        }

        let prg_start = if flags_6 & TRAINER_BIT_MASK != 0 {
            HEADER_SIZE + TRAINER_SIZE
        } else {
            HEADER_SIZE
        };
        let prg_size = prg_banks as usize * PRG_BANK_SIZE;
        let chr_size = chr_banks as usize * CHR_BANK_SIZE;
        let chr_start = prg_start + prg_size;
        let end = chr_start + chr_size;

        if bytes.len() < end {
            return Err(ImageError::Truncated {
                expected: end,
                actual: bytes.len(),
            });
        }

        tracing::debug!(
            prg_start = format_args!("0x{:04X}", prg_start),
            prg_size,
            chr_size,
            "Parsed iNES header"
        );

        Ok(Self {
            header,
            prg: bytes[prg_start..chr_start].to_vec(),
            chr: bytes[chr_start..end].to_vec(),
        })
    }

    /// Read and validate an image file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        Ok(Self::parse(&bytes)?)
    }

    pub fn prg(&self) -> &[u8] {
        &self.prg
    }

    pub fn chr(&self) -> &[u8] {
        &self.chr
    }

    pub fn prg_banks(&self) -> u8 {
        self.header[4]
    }

    pub fn chr_banks(&self) -> u8 {
        self.header[5]
    }

    pub fn mirroring(&self) -> Mirroring {
        if self.header[6] & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        }
    }

    /// Header bytes 4..=8 as sent in CartridgeSetConfig
    pub fn cartridge_config(&self) -> [u8; CART_CONFIG_LEN] {
        let mut config = [0u8; CART_CONFIG_LEN];
        config.copy_from_slice(&self.header[4..4 + CART_CONFIG_LEN]);
        config
    }

    /// Reset vector, stored 4 bytes from the end of the program region
    pub fn reset_vector(&self) -> u16 {
        let len = self.prg.len();
        u16::from_le_bytes([self.prg[len - 4], self.prg[len - 3]])
    }

    /// Bytes pushed to the device by a full load
    pub fn transfer_size(&self) -> usize {
        self.prg.len() + self.chr.len()
    }
}

/// Progress of a ROM transfer, in data bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub transferred: usize,
    pub total: usize,
}

/// Push a validated image to the device and start it
///
/// Sequence: halt, PPU off, cartridge config, program chunks, graphics
/// chunks, program counter, run. A transport failure stops the sequence
/// and leaves the CPU halted.
pub fn load_rom(
    client: &mut DeviceClient,
    image: &RomImage,
    chunk_size: usize,
    mut on_progress: impl FnMut(LoadProgress),
) -> Result<()> {
    if chunk_size == 0 || chunk_size > Payload::MAX_LEN {
        return Err(Error::Config(format!(
            "ROM chunk size {} is outside 1..={}",
            chunk_size,
            Payload::MAX_LEN
        )));
    }

    let total = image.transfer_size();
    let mut transferred = 0;
    tracing::info!(
        prg_banks = image.prg_banks(),
        chr_banks = image.chr_banks(),
        mirroring = ?image.mirroring(),
        "Loading ROM"
    );

    client.halt()?;
    client.ppu_disable()?;
    client.set_cartridge_config(image.cartridge_config())?;

    for (i, chunk) in image.prg().chunks(chunk_size).enumerate() {
        let addr = PRG_LOAD_ADDR.wrapping_add((i * chunk_size) as u16);
        client.cpu_mem_write(addr, chunk.to_vec())?;
        transferred += chunk.len();
        on_progress(LoadProgress { transferred, total });
    }

    for (i, chunk) in image.chr().chunks(chunk_size).enumerate() {
        client.ppu_mem_write((i * chunk_size) as u16, chunk.to_vec())?;
        transferred += chunk.len();
        on_progress(LoadProgress { transferred, total });
    }

    let [pcl, pch] = image.reset_vector().to_le_bytes();
    client.cpu_reg_write(CpuReg::Pcl, pcl)?;
    client.cpu_reg_write(CpuReg::Pch, pch)?;
    client.run()?;

    tracing::info!(
        bytes = total,
        reset = format_args!("${:04X}", image.reset_vector()),
        "ROM loaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Opcode;
    use crate::transport::SimulatedDevice;

    fn image(prg_banks: u8, chr_banks: u8, flags_6: u8, flags_7: u8) -> Vec<u8> {
        let mut bytes = vec![b'N', b'E', b'S', 0x1A, prg_banks, chr_banks, flags_6, flags_7];
        bytes.resize(HEADER_SIZE, 0);
        bytes.resize(
            HEADER_SIZE + prg_banks as usize * PRG_BANK_SIZE + chr_banks as usize * CHR_BANK_SIZE,
            0xEA,
        );
        bytes
    }

    #[test]
    fn test_accepts_nrom() {
        let rom = RomImage::parse(&image(2, 1, 0x01, 0)).unwrap();
        assert_eq!(rom.prg().len(), 2 * PRG_BANK_SIZE);
        assert_eq!(rom.chr().len(), CHR_BANK_SIZE);
        assert_eq!(rom.mirroring(), Mirroring::Vertical);
        assert_eq!(rom.cartridge_config(), [2, 1, 0x01, 0, 0]);
    }

    #[test]
    fn test_rejections() {
        let mut bad_sig = image(1, 1, 0, 0);
        bad_sig[3] = 0x1B;
        let cases = [
            (bad_sig, ImageError::BadSignature),
            (image(3, 1, 0, 0), ImageError::TooManyProgramBanks(3)),
            (image(1, 2, 0, 0), ImageError::TooManyGraphicsBanks(2)),
            (image(0, 1, 0, 0), ImageError::NoProgramBanks),
            (image(1, 1, 0x08, 0), ImageError::UnsupportedMirroring),
            (image(1, 1, 0x10, 0), ImageError::UnsupportedMapper(1)),
            (image(1, 1, 0, 0x40), ImageError::UnsupportedMapper(0x40)),
        ];

        for (bytes, expected) in cases {
            assert_eq!(RomImage::parse(&bytes).unwrap_err(), expected);
        }
        assert_eq!(RomImage::parse(b"NES").unwrap_err(), ImageError::BadSignature);
    }

    #[test]
    fn test_truncated_image() {
        let mut bytes = image(1, 1, 0, 0);
        bytes.truncate(HEADER_SIZE + 100);
        assert!(matches!(
            RomImage::parse(&bytes),
            Err(ImageError::Truncated { actual, .. }) if actual == HEADER_SIZE + 100
        ));
    }

    #[test]
    fn test_trainer_is_skipped() {
        let mut bytes = image(1, 0, TRAINER_BIT_MASK, 0);
        let mut with_trainer = bytes[..HEADER_SIZE].to_vec();
        with_trainer.extend(std::iter::repeat(0xFF).take(TRAINER_SIZE));
        bytes[HEADER_SIZE] = 0x4C;
        with_trainer.extend_from_slice(&bytes[HEADER_SIZE..]);

        let rom = RomImage::parse(&with_trainer).unwrap();
        assert_eq!(rom.prg()[0], 0x4C);
        assert_eq!(rom.prg().len(), PRG_BANK_SIZE);
    }

    #[test]
    fn test_reset_vector() {
        let mut bytes = image(1, 0, 0, 0);
        let end = HEADER_SIZE + PRG_BANK_SIZE;
        bytes[end - 4] = 0x00;
        bytes[end - 3] = 0xC0;
        assert_eq!(RomImage::parse(&bytes).unwrap().reset_vector(), 0xC000);
    }

    #[test]
    fn test_load_sequence_and_progress() {
        let sim = SimulatedDevice::new();
        let mut client = DeviceClient::new(sim.clone());
        let rom = RomImage::parse(&image(1, 1, 0, 0)).unwrap();

        let mut progress = Vec::new();
        load_rom(&mut client, &rom, 1024, |p| progress.push(p)).unwrap();

        let opcodes = sim.opcodes();
        assert_eq!(&opcodes[..3], &[Opcode::DebugHalt, Opcode::PpuDisable, Opcode::CartridgeSetConfig]);
        assert_eq!(opcodes.last(), Some(&Opcode::DebugRun));
        assert_eq!(progress.len(), 24);
        assert!(progress.windows(2).all(|w| w[0].transferred < w[1].transferred));
        assert_eq!(
            progress.last(),
            Some(&LoadProgress { transferred: rom.transfer_size(), total: rom.transfer_size() })
        );
        assert_eq!(sim.cpu_mem(0x8000, 2), vec![0xEA, 0xEA]);
        assert!(!sim.ppu_enabled());
    }

    #[test]
    fn test_bad_chunk_size_sends_nothing() {
        let sim = SimulatedDevice::new();
        let mut client = DeviceClient::new(sim.clone());
        let rom = RomImage::parse(&image(2, 1, 0, 0)).unwrap();

        for chunk_size in [0, Payload::MAX_LEN + 1] {
            let err = load_rom(&mut client, &rom, chunk_size, |_| {}).unwrap_err();
            assert!(matches!(err, Error::Config(_)));
        }
        assert!(sim.packets().is_empty());

        load_rom(&mut client, &rom, Payload::MAX_LEN, |_| {}).unwrap();
        assert_eq!(sim.count(Opcode::CpuMemWrite), 1);
    }

    #[test]
    fn test_failed_chunk_aborts() {
        // halt, ppu off, config, first chunk ok; second chunk short
        let sim = SimulatedDevice::new().with_fail_send_after(5);
        let mut client = DeviceClient::new(sim.clone());
        let rom = RomImage::parse(&image(1, 1, 0, 0)).unwrap();

        let err = load_rom(&mut client, &rom, 1024, |_| {}).unwrap_err();
        assert!(err.is_transport());
        assert_eq!(sim.count(Opcode::CpuMemWrite), 1);
        assert_eq!(sim.count(Opcode::DebugRun), 0);
        assert!(sim.is_halted());
    }
}
