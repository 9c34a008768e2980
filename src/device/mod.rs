//! Device-level operations built on the packet executor

pub mod asm;
pub mod client;
pub mod rom;

pub use asm::{load_asm, AsmImage};
pub use client::{execute, CancelToken, DeviceClient, WaitOptions, HANDSHAKE_PAYLOAD};
pub use rom::{load_rom, LoadProgress, Mirroring, RomImage};
