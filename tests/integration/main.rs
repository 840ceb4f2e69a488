//! Trellis integration test harness.
//!
//! Every test brings up a complete shears stack and a complete hub stack
//! joined by the in-memory carrier from `trellis-sim`, then drives the
//! system from its real edges: GPS bytes in, save triggers, application
//! log requests, and decoded host serial frames out.
//!
//!   cargo test --test integration

mod discovery;
mod ingest;
mod transfer;

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;

use trellis_core::frame::{HostMessageType, HostStatus};
use trellis_sim::{LoopbackConfig, Rig, RigConfig};

/// Longest any single wait may take before the test is declared hung.
pub const WAIT: Duration = Duration::from_secs(5);

/// Bring up a rig with the protocol-floor MTU (18-byte chunk payloads).
pub fn rig() -> Rig {
    rig_with_att(20)
}

/// Bring up a rig with a chosen link attribute size.
pub fn rig_with_att(att_payload: usize) -> Rig {
    Rig::start(RigConfig {
        carrier: LoopbackConfig { att_payload },
        ..RigConfig::default()
    })
    .expect("rig failed to start")
}

/// Drop a file into the shears storage partition.
pub fn seed_file(rig: &Rig, name: &str, contents: &[u8]) {
    std::fs::write(rig.storage_dir.join(name), contents).expect("seeding storage file");
}

/// Next host frame, bounded by [`WAIT`].
pub async fn next_frame(rig: &mut Rig) -> Result<(HostMessageType, Bytes)> {
    tokio::time::timeout(WAIT, rig.host.next())
        .await
        .context("timed out waiting for a host frame")?
}

/// Wait for a specific host status frame, failing on any other status.
pub async fn expect_status(rig: &mut Rig, expected: HostStatus) -> Result<()> {
    let (msg_type, payload) = next_frame(rig).await?;
    anyhow::ensure!(
        msg_type == HostMessageType::Status,
        "expected status {expected:?}, got {msg_type:?}"
    );
    let status = HostStatus::try_from(payload[0]).context("bad status byte")?;
    anyhow::ensure!(status == expected, "expected {expected:?}, got {status:?}");
    Ok(())
}

/// Outcome of one observed transfer on the host wire.
pub struct Offload {
    /// Concatenated log-line payloads, in arrival order.
    pub bytes: Vec<u8>,
    /// Payload length of each log-line frame.
    pub line_lens: Vec<usize>,
    /// Non-transfer statuses seen while collecting (link-up and the like).
    pub other_statuses: Vec<HostStatus>,
    /// The status that ended collection: transfer-done or transfer-error.
    pub terminal: HostStatus,
}

/// Collect host frames from transfer-start through the terminal status.
pub async fn collect_offload(rig: &mut Rig) -> Result<Offload> {
    let mut started = false;
    let mut offload = Offload {
        bytes: Vec::new(),
        line_lens: Vec::new(),
        other_statuses: Vec::new(),
        terminal: HostStatus::TransferError,
    };

    loop {
        let (msg_type, payload) = next_frame(rig).await?;
        match msg_type {
            HostMessageType::Status => match HostStatus::try_from(payload[0])? {
                HostStatus::TransferStart => started = true,
                status @ (HostStatus::TransferDone | HostStatus::TransferError) => {
                    offload.terminal = status;
                    return Ok(offload);
                }
                status => offload.other_statuses.push(status),
            },
            HostMessageType::LogLine => {
                anyhow::ensure!(started, "log-line before transfer-start");
                offload.line_lens.push(payload.len());
                offload.bytes.extend_from_slice(&payload);
            }
            HostMessageType::CutRecord => {}
        }
    }
}

/// Poll until `check` passes or [`WAIT`] elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F, what: &str) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check() {
            return Ok(());
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
