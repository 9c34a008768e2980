//! nesdbg - debug console for an FPGA implementation of the NES
//!
//! The host drives the device's debug block with small binary packets over
//! a serial link. This library provides the packet codec, the blocking
//! request/response executor, the ROM and program loaders, and a rhai
//! scripting layer for automated test batches.

pub mod cli;
pub mod commands;
pub mod common;
pub mod device;
pub mod packet;
pub mod script;
pub mod testing;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use device::DeviceClient;
pub use packet::{CpuReg, Opcode, Packet};
