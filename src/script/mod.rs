//! Embedded scripting for automated device tests

pub mod bridge;

pub use bridge::{BridgeOptions, ScriptBridge};
