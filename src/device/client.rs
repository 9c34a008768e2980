//! Request/response execution against the device
//!
//! One packet in flight at a time: `execute` writes the whole encoding in a
//! single send, then reads exactly the declared response length in a single
//! receive. Nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::config::{PollingConfig, SerialConfig};
use crate::common::{Error, Result};
use crate::packet::{codec, format_hex, CpuReg, Packet, CART_CONFIG_LEN};
use crate::transport::{SerialTransport, Transport};

/// Payload echoed back by a live device during the handshake
pub const HANDSHAKE_PAYLOAD: &[u8; 4] = b"NES\0";

/// Send one packet and collect its response
///
/// A short write or short read is an error; the link has no way to
/// resynchronize, so the caller should abandon the current operation.
pub fn execute(transport: &mut dyn Transport, packet: &Packet) -> Result<Vec<u8>> {
    let response = transfer(transport, packet)?;

    let expected = packet.response_len();
    if response.len() != expected {
        return Err(Error::ShortRead {
            expected,
            actual: response.len(),
        });
    }
    Ok(response)
}

/// Send one packet and return whatever part of its response arrived
fn transfer(transport: &mut dyn Transport, packet: &Packet) -> Result<Vec<u8>> {
    let bytes = codec::encode(packet);
    tracing::trace!(packet = %packet, tx = %format_hex(&bytes), "Sending packet");

    let written = transport.send(&bytes)?;
    if written != bytes.len() {
        return Err(Error::ShortWrite {
            expected: bytes.len(),
            actual: written,
        });
    }

    let expected = packet.response_len();
    if expected == 0 {
        return Ok(Vec::new());
    }

    let mut response = vec![0u8; expected];
    let received = transport.receive(&mut response)?;
    response.truncate(received);

    tracing::trace!(rx = %format_hex(&response), "Received response");
    Ok(response)
}

/// Shared flag used to abandon a halt wait from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How `wait_for_halt` polls
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits until halted or cancelled
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default(), CancelToken::new())
    }
}

impl WaitOptions {
    pub fn from_config(config: &PollingConfig, cancel: CancelToken) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.halt_poll_interval_ms),
            timeout: match config.halt_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            cancel,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Typed command surface over a transport
///
/// Owns the transport exclusively, so commands from any caller are
/// serialized through this one handle.
pub struct DeviceClient {
    transport: Box<dyn Transport>,
}

impl DeviceClient {
    /// Wrap an already-open transport without performing the handshake
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Open the configured serial port and confirm the device is alive
    pub fn open_serial(config: &SerialConfig) -> Result<Self> {
        let transport = SerialTransport::open(config)?;
        std::thread::sleep(Duration::from_millis(config.settle_ms));

        let mut client = Self::new(transport);
        client.handshake()?;
        Ok(client)
    }

    /// Echo the fixed identifier and require it back unchanged
    pub fn handshake(&mut self) -> Result<()> {
        // A partial reply is still reported, so keep whatever arrived
        let packet = Packet::echo(HANDSHAKE_PAYLOAD.to_vec())?;
        let received = transfer(self.transport.as_mut(), &packet)?;

        if received != HANDSHAKE_PAYLOAD {
            return Err(Error::HandshakeFailed {
                sent: HANDSHAKE_PAYLOAD.to_vec(),
                received,
            });
        }

        tracing::info!("Device handshake succeeded");
        Ok(())
    }

    pub fn execute(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        execute(self.transport.as_mut(), packet)
    }

    pub fn echo(&mut self, data: Vec<u8>) -> Result<Vec<u8>> {
        self.execute(&Packet::echo(data)?)
    }

    pub fn cpu_mem_read(&mut self, addr: u16, count: u16) -> Result<Vec<u8>> {
        self.execute(&Packet::CpuMemRead { addr, count })
    }

    pub fn cpu_mem_write(&mut self, addr: u16, data: Vec<u8>) -> Result<()> {
        self.execute(&Packet::cpu_mem_write(addr, data)?)?;
        Ok(())
    }

    pub fn ppu_mem_read(&mut self, addr: u16, count: u16) -> Result<Vec<u8>> {
        self.execute(&Packet::PpuMemRead { addr, count })
    }

    pub fn ppu_mem_write(&mut self, addr: u16, data: Vec<u8>) -> Result<()> {
        self.execute(&Packet::ppu_mem_write(addr, data)?)?;
        Ok(())
    }

    pub fn halt(&mut self) -> Result<()> {
        self.execute(&Packet::DebugHalt)?;
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        self.execute(&Packet::DebugRun)?;
        Ok(())
    }

    pub fn cpu_reg_read(&mut self, reg: CpuReg) -> Result<u8> {
        let response = self.execute(&Packet::CpuRegRead { reg })?;
        Ok(response[0])
    }

    pub fn cpu_reg_write(&mut self, reg: CpuReg, value: u8) -> Result<()> {
        self.execute(&Packet::CpuRegWrite { reg, value })?;
        Ok(())
    }

    pub fn is_halted(&mut self) -> Result<bool> {
        let response = self.execute(&Packet::QueryHalted)?;
        Ok(response[0] != 0)
    }

    pub fn ppu_disable(&mut self) -> Result<()> {
        self.execute(&Packet::PpuDisable)?;
        Ok(())
    }

    pub fn set_cartridge_config(&mut self, config: [u8; CART_CONFIG_LEN]) -> Result<()> {
        self.execute(&Packet::CartridgeSetConfig { config })?;
        Ok(())
    }

    /// Poll QueryHalted until the CPU reports halted
    ///
    /// Returns the number of polls issued. Fails with `HaltTimeout` once the
    /// timeout elapses, or `Cancelled` as soon as the token is set.
    pub fn wait_for_halt(&mut self, options: &WaitOptions) -> Result<u32> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            polls += 1;
            if self.is_halted()? {
                tracing::debug!(polls, elapsed = ?started.elapsed(), "CPU halted");
                return Ok(polls);
            }

            if let Some(timeout) = options.timeout {
                if started.elapsed() >= timeout {
                    return Err(Error::HaltTimeout(timeout));
                }
            }

            std::thread::sleep(options.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Opcode;
    use crate::transport::SimulatedDevice;

    /// Transport that accepts everything and answers with a fixed byte string
    struct Scripted {
        reply: Vec<u8>,
        sent: Vec<Vec<u8>>,
    }

    impl Transport for Scripted {
        fn send(&mut self, bytes: &[u8]) -> Result<usize> {
            self.sent.push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.reply.len());
            buf[..n].copy_from_slice(&self.reply[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_execute_sends_encoding_once() {
        let mut transport = Scripted {
            reply: vec![0xAB, 0xCD],
            sent: Vec::new(),
        };
        let response =
            execute(&mut transport, &Packet::CpuMemRead { addr: 0x8000, count: 2 }).unwrap();
        assert_eq!(response, vec![0xAB, 0xCD]);
        assert_eq!(transport.sent, vec![vec![0x01, 0x00, 0x80, 0x02, 0x00]]);
    }

    #[test]
    fn test_short_read_is_error() {
        let mut transport = Scripted {
            reply: vec![0xAB],
            sent: Vec::new(),
        };
        let err = execute(&mut transport, &Packet::CpuMemRead { addr: 0, count: 4 }).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 4, actual: 1 }));
    }

    #[test]
    fn test_no_receive_for_zero_length_response() {
        let mut transport = Scripted {
            reply: Vec::new(),
            sent: Vec::new(),
        };
        assert!(execute(&mut transport, &Packet::DebugHalt).unwrap().is_empty());
    }

    #[test]
    fn test_short_write_is_error() {
        let sim = SimulatedDevice::new().with_fail_send_after(1);
        let mut client = DeviceClient::new(sim);
        assert!(matches!(client.halt(), Err(Error::ShortWrite { .. })));
    }

    #[test]
    fn test_handshake_against_simulator() {
        let sim = SimulatedDevice::new();
        let mut client = DeviceClient::new(sim.clone());
        client.handshake().unwrap();
        assert_eq!(sim.opcodes(), vec![Opcode::Echo]);
    }

    #[test]
    fn test_handshake_mismatch() {
        let transport = Scripted {
            reply: b"XYZ\0".to_vec(),
            sent: Vec::new(),
        };
        let mut client = DeviceClient::new(transport);
        match client.handshake() {
            Err(Error::HandshakeFailed { received, .. }) => assert_eq!(received, b"XYZ\0"),
            other => panic!("expected handshake failure, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_handshake_silent_device() {
        let transport = Scripted {
            reply: Vec::new(),
            sent: Vec::new(),
        };
        let mut client = DeviceClient::new(transport);
        let err = client.handshake().unwrap_err();
        assert!(err.to_string().contains("not responding"));
    }

    #[test]
    fn test_handshake_reports_partial_reply() {
        let transport = Scripted {
            reply: b"NE".to_vec(),
            sent: Vec::new(),
        };
        let mut client = DeviceClient::new(transport);
        match client.handshake() {
            Err(Error::HandshakeFailed { sent, received }) => {
                assert_eq!(sent, HANDSHAKE_PAYLOAD.to_vec());
                assert_eq!(received, b"NE");
            }
            other => panic!("expected handshake failure, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_wait_for_halt_counts_polls() {
        let sim = SimulatedDevice::new().with_halt_after_polls(3);
        let mut client = DeviceClient::new(sim.clone());
        let options = WaitOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
            cancel: CancelToken::new(),
        };
        assert_eq!(client.wait_for_halt(&options).unwrap(), 4);
        assert_eq!(sim.count(Opcode::QueryHalted), 4);
    }

    #[test]
    fn test_wait_for_halt_already_halted() {
        let sim = SimulatedDevice::new();
        sim.set_halted(true);
        let mut client = DeviceClient::new(sim.clone());
        assert!(client.is_halted().unwrap());
        assert_eq!(client.wait_for_halt(&WaitOptions::default()).unwrap(), 1);

        client.run().unwrap();
        assert!(!sim.is_halted());
    }

    #[test]
    fn test_wait_for_halt_times_out() {
        let mut client = DeviceClient::new(SimulatedDevice::new());
        let options = WaitOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(20)),
            cancel: CancelToken::new(),
        };
        assert!(matches!(
            client.wait_for_halt(&options),
            Err(Error::HaltTimeout(_))
        ));
    }

    #[test]
    fn test_wait_for_halt_cancelled() {
        let mut client = DeviceClient::new(SimulatedDevice::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = WaitOptions::default().with_timeout(None);
        let options = WaitOptions { cancel, ..options };
        assert!(matches!(client.wait_for_halt(&options), Err(Error::Cancelled)));
    }

    #[test]
    fn test_wait_options_from_config() {
        let config = PollingConfig {
            halt_poll_interval_ms: 10,
            halt_timeout_secs: 0,
        };
        let options = WaitOptions::from_config(&config, CancelToken::new());
        assert_eq!(options.poll_interval, Duration::from_millis(10));
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_register_round_trip() {
        let mut client = DeviceClient::new(SimulatedDevice::new());
        client.cpu_reg_write(CpuReg::X, 0x42).unwrap();
        assert_eq!(client.cpu_reg_read(CpuReg::X).unwrap(), 0x42);
    }
}
