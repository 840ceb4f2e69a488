//! trellis-sim — both device stacks joined by an in-memory radio carrier.
//!
//! Used by the demo binary and the integration tests. Nothing here ships
//! on a device.

pub mod loopback;
pub mod rig;

pub use loopback::{Loopback, LoopbackConfig, LoopbackHandle, SHEARS_ADDR};
pub use rig::{HostFrames, Rig, RigConfig};
