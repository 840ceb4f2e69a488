//! Log-transfer client.
//!
//! The hub side of the offload protocol: writes `START_TRANSFER` to the
//! shears' control characteristic, reassembles the indexed chunk stream
//! from the data characteristic, and forwards every committed chunk to the
//! host as a log-line frame.
//!
//! The client tracks two things independently: an outstanding request (a
//! `START_TRANSFER` written but not yet answered) and the active reception.
//! IDLE is neither, AWAITING_ACCEPT is a request only, RECEIVING is a
//! reception. Keeping them separate means a rejected second request (BUSY)
//! cannot tear down the reception it raced against.

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::sync::mpsc;

use trellis_core::wire::{self, Command, Status, StatusCode, CONTROL_VALUE_HANDLE};
use trellis_core::HostStatus;

use crate::link::{CentralCommand, LinkId};
use crate::uplink::SerialUplink;

/// Strict policy drops a chunk whose index is not the next expected one;
/// the `realign-on-mismatch` feature instead adopts the received index and
/// commits. The mismatch warning is emitted either way.
const REALIGN_ON_MISMATCH: bool = cfg!(feature = "realign-on-mismatch");

// ── Reception ─────────────────────────────────────────────────────────────────

/// One active file reception. Created on `STATUS(ACCEPTED)`, destroyed on
/// terminal status or link loss.
#[derive(Debug)]
struct TransferReception {
    name: String,
    expected_size: u32,
    bytes_received: u32,
    next_chunk: u16,
    chunks_committed: u32,
}

/// Where the control channel lives while the link is up.
struct ControlChannel {
    link: LinkId,
    commands: mpsc::Sender<CentralCommand>,
}

// ── Client ────────────────────────────────────────────────────────────────────

/// The log-transfer client. Owned by the hub supervisor; every method runs
/// inside the supervisor's event loop.
pub struct LogClient {
    uplink: SerialUplink,
    control: Option<ControlChannel>,
    /// Request written, answer outstanding.
    awaiting: Option<String>,
    /// Chunks flowing.
    reception: Option<TransferReception>,
}

impl LogClient {
    pub fn new(uplink: SerialUplink) -> Self {
        Self {
            uplink,
            control: None,
            awaiting: None,
            reception: None,
        }
    }

    /// The control channel became usable (discovery finished and
    /// notifications are enabled).
    pub fn attach(&mut self, link: LinkId, commands: mpsc::Sender<CentralCommand>) {
        self.control = Some(ControlChannel { link, commands });
    }

    /// The link dropped. The reception dies with it, silently — the
    /// supervisor reports link-down to the host instead.
    pub fn on_disconnect(&mut self) {
        if let Some(reception) = self.reception.take() {
            tracing::warn!(
                name = %reception.name,
                bytes_received = reception.bytes_received,
                expected = reception.expected_size,
                "link lost mid-reception"
            );
        }
        self.awaiting = None;
        self.control = None;
    }

    pub fn is_receiving(&self) -> bool {
        self.reception.is_some()
    }

    /// Write `START_TRANSFER(name)` to the shears.
    ///
    /// The supervisor only calls this once the channels are known; a call
    /// without a usable control channel is a bug upstream.
    pub async fn request(&mut self, name: &str) -> Result<()> {
        let control = match &self.control {
            Some(control) => control,
            None => bail!("log requested with no usable control channel"),
        };

        if let Some(old) = self.awaiting.replace(name.to_string()) {
            tracing::warn!(old = %old, new = %name, "request superseded an unanswered request");
        }

        tracing::info!(name = %name, "requesting log");
        control
            .commands
            .send(CentralCommand::Write {
                link: control.link,
                handle: CONTROL_VALUE_HANDLE,
                data: Command::StartTransfer { name: name.to_string() }.encode(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("radio command channel closed"))?;
        Ok(())
    }

    /// Write `ABORT` to the shears. The reception ends when the resulting
    /// `STATUS(ABORTED)` comes back, not here.
    pub async fn abort(&mut self) -> Result<()> {
        let control = match &self.control {
            Some(control) => control,
            None => bail!("abort requested with no usable control channel"),
        };
        tracing::info!("aborting transfer");
        control
            .commands
            .send(CentralCommand::Write {
                link: control.link,
                handle: CONTROL_VALUE_HANDLE,
                data: Command::Abort.encode(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("radio command channel closed"))?;
        Ok(())
    }

    /// Handle a notification on the control characteristic.
    pub async fn handle_control_notification(&mut self, data: &[u8]) {
        let status = match Status::decode(data) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, data = %hex::encode(data), "undecodable status");
                return;
            }
        };

        match status.code {
            StatusCode::Accepted => self.on_accepted(status.size.unwrap_or(0)).await,
            StatusCode::Done => self.on_done(status.size).await,
            StatusCode::Aborted => {
                if let Some(reception) = self.reception.take() {
                    tracing::warn!(name = %reception.name, "transfer aborted by the shears");
                    self.host_status(HostStatus::TransferError).await;
                } else {
                    self.fail_request(status.code).await;
                }
            }
            StatusCode::NoFile | StatusCode::FsError | StatusCode::Busy => {
                self.fail_request(status.code).await;
            }
        }
    }

    async fn on_accepted(&mut self, size: u32) {
        let name = match self.awaiting.take() {
            Some(name) => name,
            None => {
                tracing::warn!(size, "ACCEPTED with no outstanding request, ignored");
                return;
            }
        };
        if let Some(stale) = self.reception.take() {
            tracing::warn!(name = %stale.name, "new acceptance replaces a live reception");
        }

        tracing::info!(name = %name, size, "transfer starting");
        self.reception = Some(TransferReception {
            name,
            expected_size: size,
            bytes_received: 0,
            next_chunk: 0,
            chunks_committed: 0,
        });
        self.host_status(HostStatus::TransferStart).await;
    }

    async fn on_done(&mut self, size: Option<u32>) {
        let reception = match self.reception.take() {
            Some(reception) => reception,
            None => {
                tracing::warn!("DONE with no active reception, ignored");
                return;
            }
        };

        if reception.bytes_received < reception.expected_size {
            // Defined behavior: the session closed clean but short. The
            // host still sees transfer-done; the gap is only logged.
            tracing::warn!(
                name = %reception.name,
                bytes_received = reception.bytes_received,
                expected = reception.expected_size,
                "transfer finished short"
            );
        } else {
            tracing::info!(
                name = %reception.name,
                bytes = reception.bytes_received,
                chunks = reception.chunks_committed,
                reported = size.unwrap_or(reception.expected_size),
                "transfer complete"
            );
        }
        self.host_status(HostStatus::TransferDone).await;
    }

    async fn fail_request(&mut self, code: StatusCode) {
        match self.awaiting.take() {
            Some(name) => {
                tracing::warn!(name = %name, code = ?code, "transfer request failed");
            }
            None => {
                tracing::warn!(code = ?code, "failure status with no outstanding request");
            }
        }
        self.host_status(HostStatus::TransferError).await;
    }

    /// Handle a notification on the data characteristic.
    ///
    /// A committed chunk is forwarded to the host before this returns, so
    /// uplink backpressure propagates to the radio loop instead of losing
    /// chunks.
    pub async fn handle_data_notification(&mut self, data: &Bytes) {
        let (index, payload) = match wire::decode_chunk(data) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable chunk notification");
                return;
            }
        };

        let reception = match &mut self.reception {
            Some(reception) => reception,
            None => {
                tracing::warn!(index, "chunk with no active reception, dropped");
                return;
            }
        };

        if index != reception.next_chunk {
            tracing::warn!(
                index,
                expected = reception.next_chunk,
                realign = REALIGN_ON_MISMATCH,
                "chunk index mismatch"
            );
            if !REALIGN_ON_MISMATCH {
                return;
            }
            reception.next_chunk = index;
        }

        reception.next_chunk = reception.next_chunk.wrapping_add(1);
        reception.bytes_received += payload.len() as u32;
        reception.chunks_committed += 1;
        tracing::trace!(index, bytes = payload.len(), "chunk committed");

        if let Err(e) = self.uplink.send_log_line(payload).await {
            tracing::error!(error = %e, "forwarding chunk to host failed");
        }
    }

    async fn host_status(&self, status: HostStatus) {
        if let Err(e) = self.uplink.send_status(status).await {
            tracing::error!(error = %e, "forwarding status to host failed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
