//! Host serial uplink.
//!
//! Single writer for the framed serial wire to the host. `send` builds the
//! complete frame up front and hands it to the drain task as one unit, so
//! frames are atomic relative to the host parser. The bounded frame queue
//! stands in for the UART transmit ring: when it is full, `send` blocks
//! the caller — that is the backpressure contract the log client relies on
//! (chunks are never dropped, the radio side just slows down).

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use zerocopy::AsBytes;

use trellis_core::frame::{self, CutRecord, HostMessageType, HostStatus};

/// Default depth of the frame queue, in frames.
pub const DEFAULT_QUEUE_FRAMES: usize = 8;

/// Sending half of the uplink. Clone freely; all clones feed one writer.
#[derive(Clone)]
pub struct SerialUplink {
    frames: mpsc::Sender<Bytes>,
}

impl SerialUplink {
    /// Build the uplink. The returned receiver feeds an [`UplinkWriter`].
    pub fn new(queue_frames: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_frames.max(1));
        (Self { frames: tx }, rx)
    }

    /// Frame and queue one message. Blocks while the queue is full.
    ///
    /// A payload over the frame maximum is a programming error and is
    /// refused before anything is queued.
    pub async fn send(&self, msg_type: HostMessageType, payload: &[u8]) -> Result<()> {
        let framed = frame::encode_frame(msg_type, payload).context("building host frame")?;
        self.frames
            .send(framed)
            .await
            .map_err(|_| anyhow::anyhow!("uplink writer is gone"))
    }

    pub async fn send_status(&self, status: HostStatus) -> Result<()> {
        self.send(HostMessageType::Status, &[status as u8]).await
    }

    pub async fn send_log_line(&self, data: &[u8]) -> Result<()> {
        self.send(HostMessageType::LogLine, data).await
    }

    pub async fn send_cut_record(&self, record: &CutRecord) -> Result<()> {
        self.send(HostMessageType::CutRecord, record.as_bytes()).await
    }
}

/// Drains queued frames onto the serial port. Each frame goes out in a
/// single write.
pub struct UplinkWriter<W> {
    frames: mpsc::Receiver<Bytes>,
    port: W,
    shutdown: broadcast::Receiver<()>,
}

impl<W: AsyncWrite + Unpin> UplinkWriter<W> {
    pub fn new(frames: mpsc::Receiver<Bytes>, port: W, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            frames,
            port,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("uplink writer shutting down");
                    return Ok(());
                }

                frame = self.frames.recv() => {
                    let frame = match frame {
                        Some(frame) => frame,
                        None => {
                            tracing::info!("uplink queue closed, writer exiting");
                            return Ok(());
                        }
                    };
                    self.port
                        .write_all(&frame)
                        .await
                        .context("writing frame to serial port")?;
                    self.port.flush().await.context("flushing serial port")?;
                    tracing::trace!(bytes = frame.len(), "frame written");
                }
            }
        }
    }
}
