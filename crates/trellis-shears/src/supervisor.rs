//! Shears connection supervisor.
//!
//! Owns the peripheral link lifecycle: keeps the device advertising while
//! unconnected, routes control writes into the log server, and resets
//! everything on link loss. All link state mutates inside this one event
//! loop — no other task writes it.

use tokio::sync::{broadcast, mpsc, watch};

use trellis_core::wire::{CONTROL_CCCD_HANDLE, DATA_CCCD_HANDLE, DEVICE_NAME, SERVICE_UUID};

use crate::link::{PeripheralCommand, PeripheralEvent};
use crate::server::SharedLogServer;

/// What the connection LED should show. The LED driver is external; it
/// watches this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Advertising, nobody connected.
    Blinking,
    /// A central is connected.
    Solid,
}

/// The peripheral-side supervisor task.
pub struct ShearsSupervisor {
    events: mpsc::Receiver<PeripheralEvent>,
    commands: mpsc::Sender<PeripheralCommand>,
    server: SharedLogServer,
    indicator: watch::Sender<IndicatorState>,
    shutdown: broadcast::Receiver<()>,
}

impl ShearsSupervisor {
    /// Build the supervisor. Returns the watch side of the indicator for
    /// the LED driver.
    pub fn new(
        events: mpsc::Receiver<PeripheralEvent>,
        commands: mpsc::Sender<PeripheralCommand>,
        server: SharedLogServer,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, watch::Receiver<IndicatorState>) {
        let (indicator, indicator_rx) = watch::channel(IndicatorState::Blinking);
        (
            Self {
                events,
                commands,
                server,
                indicator,
                shutdown,
            },
            indicator_rx,
        )
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(
            name = DEVICE_NAME,
            service = format_args!("0x{SERVICE_UUID:04X}"),
            "shears supervisor starting, advertising"
        );
        self.start_advertising().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("shears supervisor shutting down");
                    return Ok(());
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            tracing::info!("radio event channel closed, supervisor exiting");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::Connected { link, att_payload } => {
                self.server.lock().await.on_connect(link, att_payload);
                self.indicator.send_replace(IndicatorState::Solid);
            }

            PeripheralEvent::ControlWrite { link, data } => {
                tracing::debug!(link, data = %hex::encode(&data), "control write");
                self.server.lock().await.handle_control(link, &data).await;
            }

            PeripheralEvent::SubscriptionWrite { link, handle, data } => {
                // The attribute server persists the descriptor; this is
                // informational on our side.
                let channel = match handle {
                    CONTROL_CCCD_HANDLE => "control",
                    DATA_CCCD_HANDLE => "data",
                    _ => "unknown",
                };
                tracing::debug!(link, channel, data = %hex::encode(&data), "subscription updated");
            }

            PeripheralEvent::Disconnected { link } => {
                tracing::info!(link, "link down, resuming advertising");
                self.server.lock().await.on_disconnect(link);
                self.indicator.send_replace(IndicatorState::Blinking);
                self.start_advertising().await;
            }
        }
    }

    async fn start_advertising(&mut self) {
        if self.commands.send(PeripheralCommand::StartAdvertising).await.is_err() {
            tracing::error!("radio command channel closed, cannot advertise");
        }
    }
}
