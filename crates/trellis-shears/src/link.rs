//! Peripheral-side link model.
//!
//! The radio stack itself (advertising, connections, the attribute server)
//! is an external collaborator. It talks to this crate over one event
//! channel and one command channel; the supervisor owns the event loop and
//! every piece of link state. The simulator sits on the far end of the same
//! channels in tests.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Connection handle assigned by the radio stack. Only one link is live at
/// a time on the shears; the handle distinguishes stale events from a
/// connection that has already been replaced.
pub type LinkId = u16;

/// Events delivered by the radio stack.
#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    /// A central connected. `att_payload` is the link maximum attribute
    /// size (negotiated MTU − 3) — the most bytes one notification carries.
    Connected { link: LinkId, att_payload: usize },
    /// The central wrote the control characteristic value.
    ControlWrite { link: LinkId, data: Bytes },
    /// The central wrote a client configuration descriptor.
    SubscriptionWrite { link: LinkId, handle: u16, data: Bytes },
    /// The link dropped — disconnect, supervision timeout, or connect
    /// failure. Advertising does not resume on its own.
    Disconnected { link: LinkId },
}

/// Commands issued to the radio stack.
#[derive(Debug, Clone)]
pub enum PeripheralCommand {
    /// (Re)start connectable undirected advertising with the registered
    /// payload: complete local name plus the 16-bit service list.
    StartAdvertising,
    /// Notify a characteristic value to the connected central.
    Notify { link: LinkId, handle: u16, data: Bytes },
}

/// Channel pair handed to the radio stack glue.
pub struct LinkChannels {
    pub events: mpsc::Sender<PeripheralEvent>,
    pub commands: mpsc::Receiver<PeripheralCommand>,
}

/// Build the event/command channel pair for one device stack.
///
/// Returns the device-side ends (receiver of events, sender of commands)
/// and the stack-side [`LinkChannels`].
pub fn link_channels(
    depth: usize,
) -> (
    mpsc::Receiver<PeripheralEvent>,
    mpsc::Sender<PeripheralCommand>,
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
