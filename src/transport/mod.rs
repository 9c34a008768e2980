//! Byte-stream transport to the device
//!
//! The debug link is a blocking duplex stream with a fixed per-call timeout.
//! Implementations report how many bytes actually moved; judging a short
//! transfer is left to the executor.

pub mod serial;
pub mod sim;

use crate::common::Result;

pub use serial::SerialTransport;
pub use sim::SimulatedDevice;

/// Blocking byte stream between host and device
pub trait Transport: Send {
    /// Write `bytes`, returning how many the link accepted before timing out
    fn send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Fill `buf`, returning how many bytes arrived before timing out
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).receive(buf)
    }
}
