//! In-memory radio carrier.
//!
//! Stands in for the radio stacks of both devices: consumes each side's
//! command channel, applies the little bit of stack behavior the devices
//! rely on (advertising/scan matching, connection setup, discovery answers,
//! attribute writes, notification delivery), and feeds each side's event
//! channel. Notification order is preserved per channel, exactly like the
//! real link.

use tokio::sync::mpsc;

use trellis_core::wire::{
    CONTROL_CCCD_HANDLE, CONTROL_UUID, CONTROL_VALUE_HANDLE, DATA_CCCD_HANDLE, DATA_UUID,
    DATA_VALUE_HANDLE, DEVICE_NAME, SERVICE_FIRST_HANDLE, SERVICE_LAST_HANDLE, SERVICE_UUID,
};
use trellis_hub::link::{
    CentralCommand, CentralEvent, LinkChannels as HubChannels, PeerAddr,
};
use trellis_shears::link::{
    LinkChannels as ShearsChannels, PeripheralCommand, PeripheralEvent,
};

/// Fixed address the simulated shears advertises from.
pub const SHEARS_ADDR: PeerAddr = [0xC4, 0x11, 0x00, 0x5E, 0xA2, 0x01];

/// Carrier tuning.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Link maximum attribute size handed to both sides on connect
    /// (negotiated MTU − 3).
    pub att_payload: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        // MTU 23 — the protocol floor: 20-byte attributes, 18-byte chunks.
        Self { att_payload: 20 }
    }
}

enum CarrierControl {
    DropLink,
}

/// Test/demo-side control over the carrier.
#[derive(Clone)]
pub struct LoopbackHandle {
    control: mpsc::Sender<CarrierControl>,
}

impl LoopbackHandle {
    /// Sever the current connection, as a supervision timeout would.
    /// Both sides observe `Disconnected`; nothing in flight survives.
    pub async fn drop_link(&self) {
        let _ = self.control.send(CarrierControl::DropLink).await;
    }
}

/// The carrier task.
pub struct Loopback {
    shears: ShearsChannels,
    hub: HubChannels,
    config: LoopbackConfig,
    control: mpsc::Receiver<CarrierControl>,
    advertising: bool,
    scanning: bool,
    link: Option<u16>,
    next_link: u16,
}

impl Loopback {
    pub fn new(
        shears: ShearsChannels,
        hub: HubChannels,
        config: LoopbackConfig,
    ) -> (Self, LoopbackHandle) {
        let (control_tx, control_rx) = mpsc::channel(4);
        (
            Self {
                shears,
                hub,
                config,
                control: control_rx,
                advertising: false,
                scanning: false,
                link: None,
                next_link: 0x0040,
            },
            LoopbackHandle { control: control_tx },
        )
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                command = self.shears.commands.recv() => {
                    match command {
                        Some(command) => self.on_peripheral_command(command).await,
                        None => return Ok(()),
                    }
                }

                command = self.hub.commands.recv() => {
                    match command {
                        Some(command) => self.on_central_command(command).await,
                        None => return Ok(()),
                    }
                }

                control = self.control.recv() => {
                    match control {
                        Some(CarrierControl::DropLink) => self.drop_link().await,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn on_peripheral_command(&mut self, command: PeripheralCommand) {
        match command {
            PeripheralCommand::StartAdvertising => {
                self.advertising = true;
                self.try_match().await;
            }

            PeripheralCommand::Notify { link, handle, data } => {
                if self.link != Some(link) {
                    tracing::debug!(link, "notification on a dead link, dropped");
                    return;
                }
                self.to_hub(CentralEvent::Notification { link, handle, data }).await;
            }
        }
    }

    async fn on_central_command(&mut self, command: CentralCommand) {
        match command {
            CentralCommand::StartScan => {
                self.scanning = true;
                self.try_match().await;
            }

            CentralCommand::StopScan => {
                self.scanning = false;
                self.to_hub(CentralEvent::ScanStopped).await;
            }

            CentralCommand::Connect { addr, .. } => {
                if addr != SHEARS_ADDR || !self.advertising {
                    self.to_hub(CentralEvent::ConnectFailed).await;
                    return;
                }
                let link = self.next_link;
                self.next_link += 1;
                self.advertising = false;
                self.link = Some(link);
                let att_payload = self.config.att_payload;
                tracing::debug!(link, att_payload, "carrier: connection up");
                self.to_shears(PeripheralEvent::Connected { link, att_payload }).await;
                self.to_hub(CentralEvent::Connected { link, att_payload }).await;
            }

            CentralCommand::DiscoverServices { link, uuid } => {
                if self.link != Some(link) {
                    return;
                }
                if uuid == SERVICE_UUID {
                    self.to_hub(CentralEvent::ServiceRange {
                        link,
                        first: SERVICE_FIRST_HANDLE,
                        last: SERVICE_LAST_HANDLE,
                    })
                    .await;
                }
            }

            CentralCommand::DiscoverCharacteristics { link, first, last } => {
                if self.link != Some(link) {
                    return;
                }
                for (uuid, value_handle) in [
                    (CONTROL_UUID, CONTROL_VALUE_HANDLE),
                    (DATA_UUID, DATA_VALUE_HANDLE),
                ] {
                    if (first..=last).contains(&value_handle) {
                        self.to_hub(CentralEvent::Characteristic { link, uuid, value_handle })
                            .await;
                    }
                }
                self.to_hub(CentralEvent::DiscoveryComplete { link }).await;
            }

            CentralCommand::Write { link, handle, data } => {
                if self.link != Some(link) {
                    return;
                }
                match handle {
                    CONTROL_VALUE_HANDLE => {
                        self.to_shears(PeripheralEvent::ControlWrite { link, data }).await;
                    }
                    CONTROL_CCCD_HANDLE | DATA_CCCD_HANDLE => {
                        self.to_shears(PeripheralEvent::SubscriptionWrite { link, handle, data })
                            .await;
                    }
                    other => {
                        tracing::warn!(handle = other, "carrier: write to an unknown attribute");
                    }
                }
                self.to_hub(CentralEvent::WriteConfirmed { link, handle }).await;
            }
        }
    }

    /// Deliver an advertisement when someone is scanning while the shears
    /// advertises.
    async fn try_match(&mut self) {
        if self.advertising && self.scanning && self.link.is_none() {
            self.to_hub(CentralEvent::Advertisement {
                addr: SHEARS_ADDR,
                local_name: DEVICE_NAME.to_string(),
                services: vec![SERVICE_UUID],
            })
            .await;
        }
    }

    async fn drop_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        tracing::debug!(link, "carrier: link dropped");
        self.to_shears(PeripheralEvent::Disconnected { link }).await;
        self.to_hub(CentralEvent::Disconnected { link }).await;
    }

    async fn to_shears(&mut self, event: PeripheralEvent) {
        let _ = self.shears.events.send(event).await;
    }

    async fn to_hub(&mut self, event: CentralEvent) {
        let _ = self.hub.events.send(event).await;
    }
}
