//! Common utilities shared by the console, loaders and test runner

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse a number written in decimal or with a `0x`/`$` hex prefix
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('$'))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
