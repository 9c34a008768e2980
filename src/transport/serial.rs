//! Serial port transport
//!
//! Reference link settings are 38400 baud, 8 data bits, odd parity, one stop
//! bit. They come from `[serial]` in the config file.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::common::config::{ParitySetting, SerialConfig};
use crate::common::{Error, Result};

use super::Transport;

/// Transport over a host serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open and configure the port named in `config`
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let open_err = |reason: String| Error::TransportOpen {
            port: config.port.clone(),
            reason,
        };

        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => return Err(open_err(format!("unsupported data bits: {}", other))),
        };
        let stop_bits = match config.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => return Err(open_err(format!("unsupported stop bits: {}", other))),
        };
        let parity = match config.parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()
            .map_err(|e| open_err(e.to_string()))?;

        tracing::info!(
            port = %config.port,
            baud = config.baud_rate,
            "Opened serial port"
        );

        Ok(Self {
            port,
            name: config.port.clone(),
        })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < bytes.len() {
            match self.port.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    tracing::debug!(port = %self.name, written, "Serial write timed out");
                    break;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        self.port.flush()?;
        Ok(written)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    tracing::debug!(port = %self.name, filled, "Serial read timed out");
                    break;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_framing_before_opening() {
        let config = SerialConfig {
            port: "/dev/nonexistent-nesdbg".to_string(),
            data_bits: 9,
            ..SerialConfig::default()
        };
        match SerialTransport::open(&config) {
            Err(Error::TransportOpen { reason, .. }) => {
                assert!(reason.contains("data bits"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("port should not open"),
        }
    }

    #[test]
    fn test_missing_port_reports_name() {
        let config = SerialConfig {
            port: "/dev/nonexistent-nesdbg".to_string(),
            ..SerialConfig::default()
        };
        let err = SerialTransport::open(&config).err().expect("open should fail");
        assert!(err.to_string().contains("/dev/nonexistent-nesdbg"));
        assert!(err.is_transport());
    }
}
