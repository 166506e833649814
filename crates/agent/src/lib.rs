//! Guard agent: configuration and the probe/metrics HTTP surface
//!
//! The binary in `main.rs` wires these together with the monitoring loop
//! from `guard-lib`.

pub mod api;
pub mod config;
