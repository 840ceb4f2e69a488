//! Scripted end-to-end offload over the simulated carrier.
//!
//! Feeds GGA sentences into the shears, commits a few saves, lets the hub
//! connect and pull the CSV, and prints every frame the host receives.
//!
//!   RUST_LOG=debug cargo run -p trellis-sim

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;

use trellis_core::config::TrellisConfig;
use trellis_core::frame::{HostMessageType, HostStatus};
use trellis_sim::{Rig, RigConfig};

const SENTENCES: [&str; 3] = [
    "$GPGGA,192928.00,2934.5678,N,08219.7654,W,1,08,0.9,10.0,M,-34.0,M,,*68\r\n",
    "$GPGGA,192930.00,2934.5702,N,08219.7688,W,1,08,0.9,10.2,M,-34.0,M,,*6B\r\n",
    "$GNGGA,192932.00,2934.5719,N,08219.7701,W,2,09,0.8,10.1,M,-34.0,M,,*64\r\n",
];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = TrellisConfig::load()?;
    let mut rig = Rig::start(RigConfig {
        uplink_queue_frames: config.hub.uplink_queue_frames,
        ..RigConfig::default()
    })?;
    tracing::info!(storage = %rig.storage_dir.display(), "rig up");

    // Work a morning in the grove: three fixes, three cuts, three saves.
    for sentence in SENTENCES {
        rig.gps.send(Bytes::from_static(sentence.as_bytes())).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        rig.save.raise();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    rig.wait_connected().await?;
    tracing::info!(name = %config.shears.log_file, "link ready, requesting the log");
    rig.hub.request_log(&config.shears.log_file).await?;

    let mut offloaded = Vec::new();
    loop {
        let (msg_type, payload) =
            tokio::time::timeout(Duration::from_secs(5), rig.host.next()).await??;
        match msg_type {
            HostMessageType::Status => {
                let status = HostStatus::try_from(payload[0])?;
                println!("host <- status {status:?}");
                if status == HostStatus::TransferDone || status == HostStatus::TransferError {
                    break;
                }
            }
            HostMessageType::LogLine => {
                println!("host <- log-line ({} bytes)", payload.len());
                offloaded.extend_from_slice(&payload);
            }
            HostMessageType::CutRecord => {
                println!("host <- cut-record ({} bytes)", payload.len());
            }
        }
    }

    println!("\noffloaded CSV ({} bytes):", offloaded.len());
    print!("{}", String::from_utf8_lossy(&offloaded));

    let on_flash = std::fs::read(rig.csv.path())?;
    anyhow::ensure!(offloaded == on_flash, "offloaded bytes differ from flash");
    println!("\noffloaded bytes match the shears flash exactly");

    rig.shutdown();
    Ok(())
}
