//! In-process simulated device
//!
//! Answers debug packets the way the FPGA debug block does, without any
//! hardware attached. Used by `--simulate` and throughout the test suite.
//! Cloning yields another handle onto the same device, so a test can hand
//! one handle to a client and inspect state through the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::Result;
use crate::packet::{codec, CpuReg, Opcode, Packet, CART_CONFIG_LEN};

use super::Transport;

const CPU_MEM_SIZE: usize = 0x10000;
const PPU_MEM_SIZE: usize = 0x4000;

struct SimState {
    cpu_mem: Vec<u8>,
    ppu_mem: Vec<u8>,
    regs: [u8; 7],
    halted: bool,
    ppu_enabled: bool,
    cart_config: Option<[u8; CART_CONFIG_LEN]>,
    /// Bytes queued for the host to receive
    pending: VecDeque<u8>,
    /// Every packet decoded so far, in arrival order
    packets: Vec<Packet>,
    sends: usize,
    fail_send_after: Option<usize>,
    halt_after_polls: Option<u32>,
    polls_remaining: Option<u32>,
}

impl SimState {
    fn new() -> Self {
        Self {
            cpu_mem: vec![0; CPU_MEM_SIZE],
            ppu_mem: vec![0; PPU_MEM_SIZE],
            regs: [0; 7],
            halted: false,
            ppu_enabled: true,
            cart_config: None,
            pending: VecDeque::new(),
            packets: Vec::new(),
            sends: 0,
            fail_send_after: None,
            halt_after_polls: None,
            polls_remaining: None,
        }
    }

    fn apply(&mut self, packet: &Packet) {
        match packet {
            Packet::Echo { data } => self.pending.extend(data.as_bytes()),
            Packet::CpuMemRead { addr, count } => {
                let bytes = read_wrapping(&self.cpu_mem, *addr as usize, *count as usize);
                self.pending.extend(bytes);
            }
            Packet::CpuMemWrite { addr, data } => {
                write_wrapping(&mut self.cpu_mem, *addr as usize, data.as_bytes());
            }
            Packet::PpuMemRead { addr, count } => {
                let bytes = read_wrapping(&self.ppu_mem, *addr as usize, *count as usize);
                self.pending.extend(bytes);
            }
            Packet::PpuMemWrite { addr, data } => {
                write_wrapping(&mut self.ppu_mem, *addr as usize, data.as_bytes());
            }
            Packet::DebugHalt => self.halted = true,
            Packet::DebugRun => {
                self.halted = false;
                self.polls_remaining = self.halt_after_polls;
            }
            Packet::CpuRegRead { reg } => self.pending.push_back(self.regs[reg.byte() as usize]),
            Packet::CpuRegWrite { reg, value } => self.regs[reg.byte() as usize] = *value,
            Packet::QueryHalted => {
                if !self.halted {
                    match self.polls_remaining {
                        Some(0) => self.halted = true,
                        Some(n) => self.polls_remaining = Some(n - 1),
                        None => {}
                    }
                }
                self.pending.push_back(u8::from(self.halted));
            }
            Packet::PpuDisable => self.ppu_enabled = false,
            Packet::CartridgeSetConfig { config } => self.cart_config = Some(*config),
        }
    }
}

fn read_wrapping(mem: &[u8], addr: usize, count: usize) -> Vec<u8> {
    (0..count).map(|i| mem[(addr + i) % mem.len()]).collect()
}

fn write_wrapping(mem: &mut [u8], addr: usize, data: &[u8]) {
    let len = mem.len();
    for (i, byte) in data.iter().enumerate() {
        mem[(addr + i) % len] = *byte;
    }
}

/// Simulated FPGA debug target
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// A running device with zeroed memory and registers
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// After each DebugRun, report running for `polls` QueryHalted polls, then halted
    pub fn with_halt_after_polls(self, polls: u32) -> Self {
        {
            let mut state = self.lock();
            state.halt_after_polls = Some(polls);
            state.polls_remaining = Some(polls);
        }
        self
    }

    /// Make the `n`-th send (1-based) and every later one report a short write
    pub fn with_fail_send_after(self, n: usize) -> Self {
        self.lock().fail_send_after = Some(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    pub fn set_halted(&self, halted: bool) {
        self.lock().halted = halted;
    }

    pub fn ppu_enabled(&self) -> bool {
        self.lock().ppu_enabled
    }

    pub fn cart_config(&self) -> Option<[u8; CART_CONFIG_LEN]> {
        self.lock().cart_config
    }

    pub fn reg(&self, reg: CpuReg) -> u8 {
        self.lock().regs[reg.byte() as usize]
    }

    pub fn set_reg(&self, reg: CpuReg, value: u8) {
        self.lock().regs[reg.byte() as usize] = value;
    }

    pub fn cpu_mem(&self, addr: u16, len: usize) -> Vec<u8> {
        read_wrapping(&self.lock().cpu_mem, addr as usize, len)
    }

    pub fn set_cpu_mem(&self, addr: u16, data: &[u8]) {
        write_wrapping(&mut self.lock().cpu_mem, addr as usize, data);
    }

    pub fn ppu_mem(&self, addr: u16, len: usize) -> Vec<u8> {
        read_wrapping(&self.lock().ppu_mem, addr as usize, len)
    }

    /// Every packet received so far
    pub fn packets(&self) -> Vec<Packet> {
        self.lock().packets.clone()
    }

    /// Opcodes received so far, in order
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.lock().packets.iter().map(Packet::opcode).collect()
    }

    pub fn count(&self, opcode: Opcode) -> usize {
        self.lock()
            .packets
            .iter()
            .filter(|p| p.opcode() == opcode)
            .count()
    }
}

impl Transport for SimulatedDevice {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.lock();
        state.sends += 1;

        if state.fail_send_after.is_some_and(|n| state.sends >= n) {
            tracing::debug!(send = state.sends, "Simulated short write");
            return Ok(bytes.len() / 2);
        }

        let mut offset = 0;
        while offset < bytes.len() {
            match codec::decode_prefix(&bytes[offset..]) {
                Ok((packet, used)) => {
                    state.apply(&packet);
                    state.packets.push(packet);
                    offset += used;
                }
                Err(e) => {
                    // Real hardware would lose sync here; drop the rest
                    tracing::warn!(error = %e, "Simulated device discarded bytes");
                    break;
                }
            }
        }
        Ok(bytes.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.lock();
        let n = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(sim: &mut SimulatedDevice, packet: &Packet) -> Vec<u8> {
        let bytes = codec::encode(packet);
        assert_eq!(sim.send(&bytes).unwrap(), bytes.len());
        let mut buf = vec![0u8; packet.response_len()];
        let n = sim.receive(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_echo_and_memory() {
        let mut sim = SimulatedDevice::new();
        assert_eq!(send(&mut sim, &Packet::echo(b"NES\0".to_vec()).unwrap()), b"NES\0");

        send(&mut sim, &Packet::cpu_mem_write(0x0300, vec![1, 2, 3]).unwrap());
        assert_eq!(
            send(&mut sim, &Packet::CpuMemRead { addr: 0x0300, count: 3 }),
            vec![1, 2, 3]
        );
        assert_eq!(sim.cpu_mem(0x0300, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_ppu_addresses_wrap() {
        let mut sim = SimulatedDevice::new();
        send(&mut sim, &Packet::ppu_mem_write(0x3FFF, vec![0xAA, 0xBB]).unwrap());
        assert_eq!(sim.ppu_mem(0x3FFF, 1), vec![0xAA]);
        assert_eq!(sim.ppu_mem(0x0000, 1), vec![0xBB]);
    }

    #[test]
    fn test_halt_after_polls() {
        let mut sim = SimulatedDevice::new().with_halt_after_polls(2);
        assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![0]);
        assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![0]);
        assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![1]);

        send(&mut sim, &Packet::DebugRun);
        assert!(!sim.is_halted());
        assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![0]);
    }

    #[test]
    fn test_never_halts_by_default() {
        let mut sim = SimulatedDevice::new();
        for _ in 0..10 {
            assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![0]);
        }
        send(&mut sim, &Packet::DebugHalt);
        assert_eq!(send(&mut sim, &Packet::QueryHalted), vec![1]);
    }

    #[test]
    fn test_short_write_injection() {
        let mut sim = SimulatedDevice::new().with_fail_send_after(2);
        assert_eq!(sim.send(&[0x03]).unwrap(), 1);
        assert_eq!(sim.send(&[0x04, 0x04]).unwrap(), 1);
        assert_eq!(sim.opcodes(), vec![Opcode::DebugHalt]);
    }

    #[test]
    fn test_receive_without_pending_data_is_short() {
        let mut sim = SimulatedDevice::new();
        let mut buf = [0u8; 4];
        assert_eq!(sim.receive(&mut buf).unwrap(), 0);
    }
}
