//! trellis-core — shared wire formats, NMEA parsing, and configuration.
//! Both device crates depend on this one.

pub mod config;
pub mod frame;
pub mod nmea;
pub mod wire;

pub use frame::{CutRecord, HostMessageType, HostStatus};
pub use nmea::GgaFix;
pub use wire::{Command, Status, StatusCode};
