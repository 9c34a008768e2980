//! Assembled program images (`.prg`)
//!
//! Layout: a little-endian load address followed by the code bytes. The
//! load address doubles as the entry point scripts jump to.

use std::path::Path;

use crate::common::{Error, Result};
use crate::packet::Payload;

use super::DeviceClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmImage {
    pub start: u16,
    pub body: Vec<u8>,
}

impl AsmImage {
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        let invalid = |reason: String| Error::AsmImage {
            path: path.display().to_string(),
            reason,
        };

        if bytes.len() < 2 {
            return Err(invalid(format!(
                "{} bytes is too short for a load address",
                bytes.len()
            )));
        }
        let body = bytes[2..].to_vec();
        if body.len() > Payload::MAX_LEN {
            return Err(invalid(format!(
                "program body of {} bytes exceeds {} bytes",
                body.len(),
                Payload::MAX_LEN
            )));
        }

        Ok(Self {
            start: u16::from_le_bytes([bytes[0], bytes[1]]),
            body,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        Self::parse(&bytes, path)
    }
}

/// Write `<asm_dir>/<file_name>` into CPU memory and return its start address
pub fn load_asm(client: &mut DeviceClient, asm_dir: &Path, file_name: &str) -> Result<u16> {
    let path = asm_dir.join(file_name);
    let image = AsmImage::load(&path)?;

    tracing::debug!(
        path = %path.display(),
        start = format_args!("${:04X}", image.start),
        len = image.body.len(),
        "Loading program image"
    );

    if !image.body.is_empty() {
        client.cpu_mem_write(image.start, image.body)?;
    }
    Ok(image.start)
}
