//! Full two-device rig.
//!
//! Brings up a complete shears stack and a complete hub stack joined by the
//! in-memory carrier, with the hub's serial uplink draining through a real
//! writer into an in-memory port whose far side is parsed back into frames.
//! The demo binary and the integration tests both run on this.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, mpsc};

use trellis_core::frame::{Deframer, HostMessageType, HostStatus};
use trellis_hub::supervisor::HubHandle;
use trellis_hub::{HubSupervisor, SerialUplink, UplinkWriter};
use trellis_shears::{
    shared_latest_line, CsvLog, LineAssembler, LogServer, SaveRequest, SaveWorker,
    ShearsSupervisor, TransferEmitter,
};

use crate::loopback::{Loopback, LoopbackConfig, LoopbackHandle};

/// Rig tuning.
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub carrier: LoopbackConfig,
    /// Shears storage directory. A scratch directory is created when unset.
    pub storage_dir: Option<PathBuf>,
    /// Depth of the hub's serial frame queue.
    pub uplink_queue_frames: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            carrier: LoopbackConfig::default(),
            storage_dir: None,
            uplink_queue_frames: trellis_hub::DEFAULT_QUEUE_FRAMES,
        }
    }
}

/// Decoded frames as the host sees them.
pub struct HostFrames {
    rx: mpsc::Receiver<(HostMessageType, Bytes)>,
}

impl HostFrames {
    /// Next frame off the wire.
    pub async fn next(&mut self) -> Result<(HostMessageType, Bytes)> {
        self.rx.recv().await.context("host serial stream ended")
    }

    /// Next frame, asserting it is a status frame.
    pub async fn next_status(&mut self) -> Result<HostStatus> {
        let (msg_type, payload) = self.next().await?;
        anyhow::ensure!(
            msg_type == HostMessageType::Status,
            "expected a status frame, got {msg_type:?}"
        );
        HostStatus::try_from(payload[0]).context("bad status byte")
    }

    /// Everything already decoded, without waiting.
    pub fn drain(&mut self) -> Vec<(HostMessageType, Bytes)> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// One running pair of devices.
pub struct Rig {
    /// Feed raw GPS bytes into the shears UART.
    pub gps: mpsc::Sender<Bytes>,
    /// The shears save trigger (GPIO edge / software entry).
    pub save: SaveRequest,
    /// Application-facing side of the hub.
    pub hub: HubHandle,
    /// The host's view of the serial wire.
    pub host: HostFrames,
    /// Carrier control (link drops).
    pub carrier: LoopbackHandle,
    /// Where the shears keeps its files.
    pub storage_dir: PathBuf,
    /// The shears CSV log.
    pub csv: CsvLog,
    shutdown: broadcast::Sender<()>,
}

impl Rig {
    /// Bring up both stacks. Tasks run until the rig is dropped or
    /// [`Rig::shutdown`] is called.
    pub fn start(config: RigConfig) -> Result<Rig> {
        let storage_dir = match config.storage_dir {
            Some(dir) => dir,
            None => scratch_dir()?,
        };
        std::fs::create_dir_all(&storage_dir)
            .with_context(|| format!("creating {}", storage_dir.display()))?;

        let (shutdown, _) = broadcast::channel(1);

        // ── Shears stack ──
        let (shears_events, shears_commands, shears_stack) = trellis_shears::link_channels(256);
        let server = LogServer::shared(storage_dir.clone(), shears_commands.clone());
        let (shears_supervisor, _indicator) = ShearsSupervisor::new(
            shears_events,
            shears_commands,
            server.clone(),
            shutdown.subscribe(),
        );
        tokio::spawn(shears_supervisor.run());
        tokio::spawn(TransferEmitter::new(server, shutdown.subscribe()).run());

        let latest = shared_latest_line();
        let (gps, gps_rx) = mpsc::channel(256);
        tokio::spawn(LineAssembler::new(gps_rx, latest.clone(), shutdown.subscribe()).run());

        let csv = CsvLog::new(storage_dir.join("gps_points.csv"));
        let save = SaveRequest::new();
        tokio::spawn(
            SaveWorker::new(save.clone(), latest, csv.clone(), shutdown.subscribe()).run(),
        );

        // ── Hub stack ──
        let (uplink, frame_queue) = SerialUplink::new(config.uplink_queue_frames);
        let (port, host_port) = tokio::io::duplex(4096);
        tokio::spawn(UplinkWriter::new(frame_queue, port, shutdown.subscribe()).run());
        let host = HostFrames {
            rx: spawn_host_parser(host_port),
        };

        let (hub_events, hub_commands, hub_stack) = trellis_hub::link_channels(256);
        let (hub_supervisor, hub) =
            HubSupervisor::new(hub_events, hub_commands, uplink, shutdown.subscribe());
        tokio::spawn(hub_supervisor.run());

        // ── Carrier ──
        let (carrier_task, carrier) = Loopback::new(shears_stack, hub_stack, config.carrier);
        tokio::spawn(carrier_task.run());

        Ok(Rig {
            gps,
            save,
            hub,
            host,
            carrier,
            storage_dir,
            csv,
            shutdown,
        })
    }

    /// Stop every task in the rig.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Wait until the hub reports a usable link.
    pub async fn wait_connected(&mut self) -> Result<()> {
        let mut connected = self.hub.connected.clone();
        while !*connected.borrow_and_update() {
            connected.changed().await.context("hub supervisor gone")?;
        }
        Ok(())
    }
}

/// Read the host side of the serial wire and decode frames off it.
fn spawn_host_parser(
    mut port: tokio::io::DuplexStream,
) -> mpsc::Receiver<(HostMessageType, Bytes)> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut deframer = Deframer::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let n = match port.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for frame in deframer.push(&buf[..n]) {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }
    });
    rx
}

fn scratch_dir() -> Result<PathBuf> {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let dir = std::env::temp_dir().join(format!(
        "trellis-rig-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}
