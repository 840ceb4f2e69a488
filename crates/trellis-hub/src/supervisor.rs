//! Hub connection supervisor.
//!
//! Owns the central link lifecycle: scans for the shears by its advertised
//! name, connects with fixed parameters, walks service then characteristic
//! discovery, enables notifications on both channels, and only then hands
//! the link to the log client. Scanning resumes on disconnect, connect
//! failure, or scan completion.
//!
//! All link state (handles, phase, pending request) mutates inside this one
//! event loop; the application reaches in through the request channel and
//! the `connected` watch.

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};

use trellis_core::frame::HostStatus;
use trellis_core::wire::{
    CCCD_ENABLE_NOTIFICATIONS, CONTROL_UUID, DATA_UUID, DEVICE_NAME, SERVICE_UUID,
};

use crate::client::LogClient;
use crate::link::{CentralCommand, CentralEvent, ConnectionParams, LinkId, PeerAddr};
use crate::pending::PendingRequest;
use crate::uplink::SerialUplink;

/// What the connection LED should show. The LED driver is external.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    /// Scanning, no usable link.
    Blinking,
    /// Connected with both channels subscribed.
    Solid,
}

/// Where the supervisor is in the link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Connecting,
    DiscoveringServices { link: LinkId },
    DiscoveringCharacteristics { link: LinkId },
    EnablingControl { link: LinkId },
    EnablingData { link: LinkId },
    Ready { link: LinkId },
}

/// Handles located during discovery.
#[derive(Debug, Default, Clone, Copy)]
struct Discovered {
    control_value: Option<u16>,
    data_value: Option<u16>,
}

/// What the application can ask of the supervisor.
enum AppRequest {
    /// Offload a log file.
    Log(String),
    /// Cancel the active transfer.
    Abort,
}

/// The central-side supervisor task.
pub struct HubSupervisor {
    events: mpsc::Receiver<CentralEvent>,
    commands: mpsc::Sender<CentralCommand>,
    client: LogClient,
    uplink: SerialUplink,
    requests: mpsc::Receiver<AppRequest>,
    pending: PendingRequest,
    phase: Phase,
    discovered: Discovered,
    connected: watch::Sender<bool>,
    indicator: watch::Sender<IndicatorState>,
    shutdown: broadcast::Receiver<()>,
}

/// Application-facing side of the supervisor.
pub struct HubHandle {
    requests: mpsc::Sender<AppRequest>,
    pub connected: watch::Receiver<bool>,
    pub indicator: watch::Receiver<IndicatorState>,
}

impl HubHandle {
    /// Ask for a log file. If discovery has not completed yet, the request
    /// parks in the pending slot and goes out when it does.
    pub async fn request_log(&self, name: &str) -> anyhow::Result<()> {
        self.requests
            .send(AppRequest::Log(name.to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("hub supervisor is gone"))
    }

    /// Cancel the active transfer.
    pub async fn abort_transfer(&self) -> anyhow::Result<()> {
        self.requests
            .send(AppRequest::Abort)
            .await
            .map_err(|_| anyhow::anyhow!("hub supervisor is gone"))
    }
}

impl HubSupervisor {
    pub fn new(
        events: mpsc::Receiver<CentralEvent>,
        commands: mpsc::Sender<CentralCommand>,
        uplink: SerialUplink,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, HubHandle) {
        let (request_tx, request_rx) = mpsc::channel(8);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (indicator_tx, indicator_rx) = watch::channel(IndicatorState::Blinking);
        let client = LogClient::new(uplink.clone());
        (
            Self {
                events,
                commands,
                client,
                uplink,
                requests: request_rx,
                pending: PendingRequest::new(),
                phase: Phase::Scanning,
                discovered: Discovered::default(),
                connected: connected_tx,
                indicator: indicator_tx,
                shutdown,
            },
            HubHandle {
                requests: request_tx,
                connected: connected_rx,
                indicator: indicator_rx,
            },
        )
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(target_name = DEVICE_NAME, "hub supervisor starting, scanning");
        self.command(CentralCommand::StartScan).await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("hub supervisor shutting down");
                    return Ok(());
                }

                request = self.requests.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => {
                            tracing::info!("application request channel closed, supervisor exiting");
                            return Ok(());
                        }
                    }
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

    async fn handle_request(&mut self, request: AppRequest) {
        match request {
            AppRequest::Log(name) => {
                if matches!(self.phase, Phase::Ready { .. }) {
                    if let Err(e) = self.client.request(&name).await {
                        tracing::error!(error = %e, "log request failed");
                    }
                } else {
                    tracing::info!(name = %name, phase = ?self.phase, "link not ready, request parked");
                    self.pending.store(name);
                }
            }
            AppRequest::Abort => {
                if matches!(self.phase, Phase::Ready { .. }) {
                    if let Err(e) = self.client.abort().await {
                        tracing::error!(error = %e, "abort failed");
                    }
                } else {
                    tracing::debug!("abort with no usable link, ignored");
                }
            }
        }
    }

    async fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::Advertisement { addr, local_name, services } => {
                self.handle_advertisement(addr, local_name, services).await;
            }

            CentralEvent::ScanStopped => {
                // Scan ran out on its own. While we are mid-connect this is
                // just the cancellation we asked for.
                if self.phase == Phase::Scanning {
                    self.command(CentralCommand::StartScan).await;
                }
            }

            CentralEvent::Connected { link, att_payload } => {
                tracing::info!(link, att_payload, "connected, discovering services");
                self.phase = Phase::DiscoveringServices { link };
                self.discovered = Discovered::default();
                self.command(CentralCommand::DiscoverServices { link, uuid: SERVICE_UUID })
                    .await;
            }

            CentralEvent::ConnectFailed => {
                tracing::warn!("connect failed, resuming scan");
                self.phase = Phase::Scanning;
                self.command(CentralCommand::StartScan).await;
            }

            CentralEvent::ServiceRange { link, first, last } => {
                if self.phase != (Phase::DiscoveringServices { link }) {
                    tracing::debug!(link, "service range outside discovery, ignored");
                    return;
                }
                tracing::debug!(link, first, last, "service located");
                self.phase = Phase::DiscoveringCharacteristics { link };
                self.command(CentralCommand::DiscoverCharacteristics { link, first, last })
                    .await;
            }

            CentralEvent::Characteristic { link, uuid, value_handle } => {
                if self.phase != (Phase::DiscoveringCharacteristics { link }) {
                    return;
                }
                match uuid {
                    CONTROL_UUID => self.discovered.control_value = Some(value_handle),
                    DATA_UUID => self.discovered.data_value = Some(value_handle),
                    other => {
                        tracing::debug!(uuid = format_args!("0x{other:04X}"), "unrelated characteristic")
                    }
                }
            }

            CentralEvent::DiscoveryComplete { link } => {
                self.finish_discovery(link).await;
            }

            CentralEvent::WriteConfirmed { link, handle } => {
                self.handle_write_confirmed(link, handle).await;
            }

            CentralEvent::Notification { link, handle, data } => {
                self.route_notification(link, handle, data).await;
            }

            CentralEvent::Disconnected { link } => {
                self.handle_disconnected(link).await;
            }
        }
    }

    async fn handle_advertisement(&mut self, addr: PeerAddr, local_name: String, services: Vec<u16>) {
        if self.phase != Phase::Scanning {
            return;
        }
        if local_name != DEVICE_NAME {
            tracing::trace!(name = %local_name, "advertisement from someone else");
            return;
        }
        if !services.contains(&SERVICE_UUID) {
            tracing::debug!(name = %local_name, "matching name without the service, skipped");
            return;
        }

        tracing::info!(addr = %hex::encode(addr), "shears found, connecting");
        self.phase = Phase::Connecting;
        self.command(CentralCommand::StopScan).await;
        self.command(CentralCommand::Connect {
            addr,
            params: ConnectionParams::default(),
        })
        .await;
    }

    async fn finish_discovery(&mut self, link: LinkId) {
        if self.phase != (Phase::DiscoveringCharacteristics { link }) {
            return;
        }
        let (Some(control_value), Some(data_value)) =
            (self.discovered.control_value, self.discovered.data_value)
        else {
            tracing::error!(
                link,
                control = ?self.discovered.control_value,
                data = ?self.discovered.data_value,
                "peer is missing expected characteristics"
            );
            self.phase = Phase::Scanning;
            self.command(CentralCommand::StartScan).await;
            return;
        };

        // Subscribe control first, data second; each by writing {0x01,0x00}
        // to the descriptor just after the value handle.
        tracing::debug!(link, control_value, data_value, "enabling notifications");
        self.phase = Phase::EnablingControl { link };
        self.command(CentralCommand::Write {
            link,
            handle: control_value + 1,
            data: Bytes::copy_from_slice(&CCCD_ENABLE_NOTIFICATIONS),
        })
        .await;
    }

    async fn handle_write_confirmed(&mut self, link: LinkId, handle: u16) {
        match (self.phase, self.discovered.control_value, self.discovered.data_value) {
            (Phase::EnablingControl { link: l }, Some(control), Some(data))
                if l == link && handle == control + 1 =>
            {
                self.phase = Phase::EnablingData { link };
                self.command(CentralCommand::Write {
                    link,
                    handle: data + 1,
                    data: Bytes::copy_from_slice(&CCCD_ENABLE_NOTIFICATIONS),
                })
                .await;
            }

            (Phase::EnablingData { link: l }, _, Some(data))
                if l == link && handle == data + 1 =>
            {
                self.ready(link).await;
            }

            _ => {
                // Confirmations for control-channel writes land here too;
                // nothing to drive.
                tracing::trace!(link, handle, "write confirmed");
            }
        }
    }

    /// Both channels subscribed — the link is usable.
    async fn ready(&mut self, link: LinkId) {
        tracing::info!(link, "link ready");
        self.phase = Phase::Ready { link };
        self.client.attach(link, self.commands.clone());
        if let Err(e) = self.uplink.send_status(HostStatus::LinkUp).await {
            tracing::error!(error = %e, "reporting link-up failed");
        }
        self.indicator.send_replace(IndicatorState::Solid);
        self.connected.send_replace(true);

        if let Some(name) = self.pending.take() {
            tracing::info!(name = %name, "flushing pending log request");
            if let Err(e) = self.client.request(&name).await {
                tracing::error!(error = %e, "pending log request failed");
            }
        }
    }

    async fn route_notification(&mut self, link: LinkId, handle: u16, data: Bytes) {
        if !matches!(self.phase, Phase::Ready { link: l } if l == link) {
            tracing::debug!(link, handle, "notification before ready, dropped");
            return;
        }
        match (self.discovered.control_value, self.discovered.data_value) {
            (Some(control), _) if handle == control => {
                self.client.handle_control_notification(&data).await;
            }
            (_, Some(data_handle)) if handle == data_handle => {
                self.client.handle_data_notification(&data).await;
            }
            _ => {
                tracing::warn!(link, handle, "notification on an unexpected handle");
            }
        }
    }

    async fn handle_disconnected(&mut self, link: LinkId) {
        let was_ready = matches!(self.phase, Phase::Ready { link: l } if l == link);
        tracing::info!(link, was_ready, "link down, resuming scan");

        self.client.on_disconnect();
        self.discovered = Discovered::default();
        self.phase = Phase::Scanning;
        self.connected.send_replace(false);
        self.indicator.send_replace(IndicatorState::Blinking);
        if was_ready {
            if let Err(e) = self.uplink.send_status(HostStatus::LinkDown).await {
                tracing::error!(error = %e, "reporting link-down failed");
            }
        }
        self.command(CentralCommand::StartScan).await;
    }

    async fn command(&mut self, command: CentralCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::error!("radio command channel closed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
