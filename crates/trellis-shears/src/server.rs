//! Log-transfer server.
//!
//! The shears side of the offload protocol: accepts `START_TRANSFER`
//! requests on the control channel, streams the requested file as indexed
//! chunks on the data channel, and reports terminal status back on the
//! control channel.
//!
//! State machine: IDLE → ACTIVE → FINALIZING → IDLE. At most one session
//! exists; a request that arrives while one is active draws BUSY and the
//! original session is untouched. Link loss silently destroys the session —
//! the peer is gone, there is nobody to notify.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};

use trellis_core::wire::{
    self, Command, Status, StatusCode, CHUNK_HEADER_LEN, CONTROL_VALUE_HANDLE, DATA_VALUE_HANDLE,
    MAX_BASENAME_LEN, MAX_CHUNKS_PER_SESSION, MAX_CHUNK_PAYLOAD,
};

use crate::link::{LinkId, PeripheralCommand};

/// Emitter cadence while a transfer is streaming.
pub const ACTIVE_EMIT_INTERVAL: Duration = Duration::from_millis(10);

/// Emitter cadence while the server sits idle.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Session ───────────────────────────────────────────────────────────────────

/// One active file offload. Created on `START_TRANSFER` acceptance,
/// destroyed on terminal status or link loss.
struct TransferSession {
    name: String,
    file: File,
    total_size: u32,
    bytes_emitted: u32,
    chunk_index: u16,
    chunk_payload: usize,
    link: LinkId,
}

enum ServerState {
    Idle,
    Active(TransferSession),
    /// All chunks emitted and the file closed; the DONE status goes out on
    /// the next emitter step.
    Finalizing {
        name: String,
        total_size: u32,
        link: LinkId,
    },
}

struct LinkInfo {
    id: LinkId,
    att_payload: usize,
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The log-transfer state machine. Owned behind a mutex shared by the
/// supervisor (control writes, link lifecycle) and the emitter task.
pub struct LogServer {
    storage_dir: PathBuf,
    commands: mpsc::Sender<PeripheralCommand>,
    link: Option<LinkInfo>,
    state: ServerState,
}

pub type SharedLogServer = Arc<Mutex<LogServer>>;

impl LogServer {
    pub fn new(storage_dir: PathBuf, commands: mpsc::Sender<PeripheralCommand>) -> Self {
        Self {
            storage_dir,
            commands,
            link: None,
            state: ServerState::Idle,
        }
    }

    pub fn shared(storage_dir: PathBuf, commands: mpsc::Sender<PeripheralCommand>) -> SharedLogServer {
        Arc::new(Mutex::new(Self::new(storage_dir, commands)))
    }

    /// A transfer is streaming (the emitter should run at full cadence).
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ServerState::Idle)
    }

    /// A central connected.
    pub fn on_connect(&mut self, link: LinkId, att_payload: usize) {
        if self.is_active() {
            // A session can only outlive its link through a missed
            // disconnect event. Drop it before adopting the new link.
            tracing::warn!(link, "new connection with a session still open, dropping session");
            self.state = ServerState::Idle;
        }
        tracing::info!(link, att_payload, "link up");
        self.link = Some(LinkInfo { id: link, att_payload });
    }

    /// The link dropped. Close any open file and reset without emitting —
    /// the peer will not receive anything we send.
    pub fn on_disconnect(&mut self, link: LinkId) {
        match &self.link {
            Some(info) if info.id == link => {}
            _ => {
                tracing::debug!(link, "disconnect for a link we no longer track");
                return;
            }
        }
        if let ServerState::Active(session) = &self.state {
            tracing::warn!(
                name = %session.name,
                bytes_emitted = session.bytes_emitted,
                total_size = session.total_size,
                "link lost mid-transfer, session dropped"
            );
        }
        self.link = None;
        self.state = ServerState::Idle;
    }

    /// Handle one write to the control characteristic.
    pub async fn handle_control(&mut self, link: LinkId, data: &[u8]) {
        let command = match Command::decode(data) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, data = %hex::encode(data), "undecodable control write");
                return;
            }
        };

        match command {
            Command::Nop => {}
            Command::StartTransfer { name } => self.start_transfer(link, name).await,
            Command::Abort => self.abort(link).await,
        }
    }

    async fn start_transfer(&mut self, link: LinkId, name: String) {
        if self.is_active() {
            tracing::info!(name = %name, "transfer requested while busy, rejected");
            self.send_status(link, StatusCode::Busy, None).await;
            return;
        }

        let att_payload = match &self.link {
            Some(info) => info.att_payload,
            None => {
                tracing::warn!("transfer request with no tracked link, ignored");
                return;
            }
        };

        // Usable payload per chunk: attribute size minus the index header,
        // capped by the protocol maximum.
        let chunk_payload = att_payload.saturating_sub(CHUNK_HEADER_LEN).min(MAX_CHUNK_PAYLOAD);
        if chunk_payload == 0 {
            tracing::warn!(att_payload, "link attribute size leaves no room for payload");
            self.send_status(link, StatusCode::FsError, None).await;
            return;
        }

        if name.is_empty() || name.len() > MAX_BASENAME_LEN {
            tracing::warn!(name = %name, len = name.len(), "bad basename length");
            self.send_status(link, StatusCode::FsError, None).await;
            return;
        }

        let path = PathBuf::from(format!("{}/{}", self.storage_dir.display(), name));
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "requested file not available");
                self.send_status(link, StatusCode::NoFile, None).await;
                return;
            }
        };

        let total_size = match file.metadata() {
            Ok(meta) if meta.len() <= u32::MAX as u64 => meta.len() as u32,
            Ok(meta) => {
                tracing::warn!(size = meta.len(), "file too large for the size field");
                self.send_status(link, StatusCode::FsError, None).await;
                return;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not size file");
                self.send_status(link, StatusCode::FsError, None).await;
                return;
            }
        };

        // The chunk index is 16-bit. A file that does not fit in its index
        // space is rejected up front rather than wrapping mid-stream.
        let chunks_needed = total_size.div_ceil(chunk_payload as u32);
        if chunks_needed > MAX_CHUNKS_PER_SESSION {
            tracing::warn!(
                total_size,
                chunk_payload,
                chunks_needed,
                "file exceeds chunk index space"
            );
            self.send_status(link, StatusCode::FsError, None).await;
            return;
        }

        tracing::info!(
            name = %name,
            size = total_size,
            chunk_payload,
            link,
            "transfer accepted"
        );
        self.send_status(link, StatusCode::Accepted, Some(total_size)).await;
        self.state = ServerState::Active(TransferSession {
            name,
            file,
            total_size,
            bytes_emitted: 0,
            chunk_index: 0,
            chunk_payload,
            link,
        });
    }

    async fn abort(&mut self, link: LinkId) {
        match std::mem::replace(&mut self.state, ServerState::Idle) {
            ServerState::Idle => {
                tracing::debug!(link, "abort with no active transfer");
            }
            ServerState::Active(session) => {
                tracing::info!(
                    name = %session.name,
                    bytes_emitted = session.bytes_emitted,
                    "transfer aborted on request"
                );
                drop(session.file);
                self.send_status(session.link, StatusCode::Aborted, Some(session.total_size))
                    .await;
            }
            ServerState::Finalizing { name, total_size, link: session_link } => {
                tracing::info!(name = %name, "abort raced the final status");
                self.send_status(session_link, StatusCode::Aborted, Some(total_size)).await;
            }
        }
    }

    /// One emitter step. In ACTIVE this reads and emits at most one chunk;
    /// in FINALIZING it delivers the DONE status.
    pub async fn poll(&mut self) {
        match std::mem::replace(&mut self.state, ServerState::Idle) {
            ServerState::Idle => {}

            ServerState::Active(mut session) => {
                // Never read past the size taken at session start: a save
                // committed mid-transfer grows the file, but that row
                // belongs to the next session.
                let remaining = (session.total_size - session.bytes_emitted) as usize;
                let want = remaining.min(session.chunk_payload);
                if want == 0 {
                    self.finish(session);
                    return;
                }
                let mut buf = vec![0u8; want];
                match session.file.read(&mut buf) {
                    Ok(0) => {
                        // Clean EOF on a chunk boundary — no empty chunk.
                        self.finish(session);
                    }
                    Ok(n) => {
                        let framed = wire::encode_chunk(session.chunk_index, &buf[..n]);
                        self.notify(session.link, DATA_VALUE_HANDLE, framed).await;
                        tracing::trace!(
                            index = session.chunk_index,
                            bytes = n,
                            "chunk emitted"
                        );
                        session.chunk_index = session.chunk_index.wrapping_add(1);
                        session.bytes_emitted += n as u32;

                        if n < session.chunk_payload {
                            self.finish(session);
                        } else {
                            self.state = ServerState::Active(session);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            name = %session.name,
                            error = %e,
                            "read failed mid-transfer"
                        );
                        drop(session.file);
                        self.send_status(session.link, StatusCode::FsError, None).await;
                    }
                }
            }

            ServerState::Finalizing { name, total_size, link } => {
                tracing::info!(name = %name, size = total_size, "transfer complete");
                self.send_status(link, StatusCode::Done, Some(total_size)).await;
            }
        }
    }

    /// Close the file and arm the DONE status for the next step.
    fn finish(&mut self, session: TransferSession) {
        let TransferSession { name, file, total_size, bytes_emitted, link, .. } = session;
        drop(file);
        tracing::debug!(name = %name, bytes_emitted, "all chunks emitted");
        self.state = ServerState::Finalizing { name, total_size, link };
    }

    async fn send_status(&mut self, link: LinkId, code: StatusCode, size: Option<u32>) {
        let payload = Status::new(code, size).encode();
        self.notify(link, CONTROL_VALUE_HANDLE, payload).await;
    }

    async fn notify(&mut self, link: LinkId, handle: u16, data: bytes::Bytes) {
        let command = PeripheralCommand::Notify { link, handle, data };
        if self.commands.send(command).await.is_err() {
            // The radio stack is gone; treat it like link loss.
            tracing::error!("radio command channel closed, dropping session");
            self.link = None;
            self.state = ServerState::Idle;
        }
    }
}

// ── Emitter task ──────────────────────────────────────────────────────────────

/// Drives the server's periodic step: every 10 ms while a transfer is
/// active, every 50 ms otherwise.
pub struct TransferEmitter {
    server: SharedLogServer,
    shutdown: broadcast::Receiver<()>,
}

impl TransferEmitter {
    pub fn new(server: SharedLogServer, shutdown: broadcast::Receiver<()>) -> Self {
        Self { server, shutdown }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let delay = if self.server.lock().await.is_active() {
                ACTIVE_EMIT_INTERVAL
            } else {
                IDLE_POLL_INTERVAL
            };

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("transfer emitter shutting down");
                    return Ok(());
                }

                _ = tokio::time::sleep(delay) => {
                    self.server.lock().await.poll().await;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
