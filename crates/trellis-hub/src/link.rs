//! Central-side link model.
//!
//! The hub's radio stack (scanning, connections, the attribute client) is
//! an external collaborator reached over one event channel and one command
//! channel. The supervisor owns the event loop; nothing else mutates link
//! state.

use bytes::Bytes;
use tokio::sync::mpsc;

use trellis_core::wire::{
    CONN_INTERVAL_MAX, CONN_INTERVAL_MIN, CONN_LATENCY, CONN_SUPERVISION_TIMEOUT,
};

/// Connection handle assigned by the radio stack.
pub type LinkId = u16;

/// Six-byte device address from an advertisement.
pub type PeerAddr = [u8; 6];

/// Parameters requested when initiating a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            interval_min: CONN_INTERVAL_MIN,
            interval_max: CONN_INTERVAL_MAX,
            latency: CONN_LATENCY,
            supervision_timeout: CONN_SUPERVISION_TIMEOUT,
        }
    }
}

/// Events delivered by the radio stack.
#[derive(Debug, Clone)]
pub enum CentralEvent {
    /// A connectable advertisement was observed while scanning.
    Advertisement {
        addr: PeerAddr,
        local_name: String,
        services: Vec<u16>,
    },
    /// Scanning finished on its own (duration elapsed) or was stopped.
    ScanStopped,
    /// A connection came up. `att_payload` is the link maximum attribute
    /// size (negotiated MTU − 3).
    Connected { link: LinkId, att_payload: usize },
    /// The connection attempt failed before coming up.
    ConnectFailed,
    /// The link dropped — disconnect or supervision timeout.
    Disconnected { link: LinkId },
    /// Service discovery located the requested service's handle range.
    ServiceRange { link: LinkId, first: u16, last: u16 },
    /// Characteristic discovery located one characteristic value.
    Characteristic {
        link: LinkId,
        uuid: u16,
        value_handle: u16,
    },
    /// Characteristic discovery finished for the requested range.
    DiscoveryComplete { link: LinkId },
    /// An attribute write completed.
    WriteConfirmed { link: LinkId, handle: u16 },
    /// A notification arrived on a subscribed characteristic.
    Notification {
        link: LinkId,
        handle: u16,
        data: Bytes,
    },
}

/// Commands issued to the radio stack.
#[derive(Debug, Clone)]
pub enum CentralCommand {
    /// Start active scanning for advertisements.
    StartScan,
    /// Cancel scanning (a match was found).
    StopScan,
    /// Initiate a connection to an advertiser.
    Connect {
        addr: PeerAddr,
        params: ConnectionParams,
    },
    /// Discover the primary service with the given 16-bit identifier.
    DiscoverServices { link: LinkId, uuid: u16 },
    /// Discover characteristics within a handle range.
    DiscoverCharacteristics {
        link: LinkId,
        first: u16,
        last: u16,
    },
    /// Write an attribute value (control commands, subscription
    /// descriptors).
    Write {
        link: LinkId,
        handle: u16,
        data: Bytes,
    },
}

/// Channel pair handed to the radio stack glue.
pub struct LinkChannels {
    pub events: mpsc::Sender<CentralEvent>,
    pub commands: mpsc::Receiver<CentralCommand>,
}

/// Build the event/command channel pair for one hub stack.
pub fn link_channels(
    depth: usize,
) -> (
    mpsc::Receiver<CentralEvent>,
    mpsc::Sender<CentralCommand>,
    LinkChannels,
) {
    let (event_tx, event_rx) = mpsc::channel(depth);
    let (command_tx, command_rx) = mpsc::channel(depth);
    (
        event_rx,
        command_tx,
        LinkChannels {
            events: event_tx,
            commands: command_rx,
        },
    )
}
