//! trellis-hub — the stationary base device stack.
//!
//! Wires together the central link supervisor, the log-transfer client,
//! and the host serial uplink. The radio stack and the host UART are
//! external; they sit on the far ends of the channels this crate exposes.

pub mod client;
pub mod link;
pub mod pending;
pub mod supervisor;
pub mod uplink;

pub use client::LogClient;
pub use link::{
    link_channels, CentralCommand, CentralEvent, ConnectionParams, LinkChannels, LinkId, PeerAddr,
};
pub use pending::PendingRequest;
pub use supervisor::{HubHandle, HubSupervisor, IndicatorState};
pub use uplink::{SerialUplink, UplinkWriter, DEFAULT_QUEUE_FRAMES};
