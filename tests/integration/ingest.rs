//! Ingest-path scenarios: GPS bytes → line assembly → save → CSV row,
//! and the combined ingest-then-offload round trip.

use crate::*;
use bytes::Bytes;
use trellis_core::frame::HostStatus;
use trellis_shears::logfile::CSV_HEADER;

const SENTENCE: &str =
    "$GPGGA,192928.00,2934.5678,N,08219.7654,W,1,08,0.9,10.0,M,-34.0,M,,*68\r\n";

/// The documented conversion and precision, end to end: feed the sample
/// sentence, trigger a save, read the exact committed row.
#[tokio::test]
async fn save_commits_the_documented_row() -> anyhow::Result<()> {
    let rig = rig();

    rig.gps.send(Bytes::from_static(SENTENCE.as_bytes())).await?;
    // Let the assembler publish before pulling the trigger.
    wait_until(|| rig.gps.capacity() == rig.gps.max_capacity(), "assembler drain").await?;
    rig.save.raise();

    let path = rig.csv.path().to_path_buf();
    wait_until(|| path.exists(), "CSV row commit").await?;

    let text = std::fs::read_to_string(&path)?;
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), CSV_HEADER);
    assert_eq!(
        lines.next().unwrap(),
        "192928.00,29.5761300,-82.3294233,1,8,0.9,10.000,-34.000"
    );
    assert!(lines.next().is_none());

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn save_without_a_fix_commits_nothing() -> anyhow::Result<()> {
    let rig = rig();

    rig.save.raise();
    wait_until(|| !rig.save.is_raised(), "flag consumption").await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(!rig.csv.path().exists(), "no sentence, no row");
    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn malformed_sentences_are_dropped() -> anyhow::Result<()> {
    let rig = rig();

    for line in [
        "$GPRMC,192928.00,A,2934.5678,N,08219.7654,W,0.2,84.4,230394,,,A*68\r\n",
        "$GPGGA,192928.00,2934.5678,N\r\n",
    ] {
        rig.gps.send(Bytes::copy_from_slice(line.as_bytes())).await?;
        wait_until(|| rig.gps.capacity() == rig.gps.max_capacity(), "assembler drain").await?;
        rig.save.raise();
        wait_until(|| !rig.save.is_raised(), "flag consumption").await?;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(!rig.csv.path().exists());
    rig.shutdown();
    Ok(())
}

/// A sentence that arrives split across UART reads still commits, and the
/// GNSS talker variant is accepted.
#[tokio::test]
async fn split_delivery_and_gnss_talker_commit() -> anyhow::Result<()> {
    let rig = rig();
    let sentence = SENTENCE.replace("$GPGGA", "$GNGGA");
    let (head, tail) = sentence.split_at(17);

    rig.gps.send(Bytes::copy_from_slice(head.as_bytes())).await?;
    rig.gps.send(Bytes::copy_from_slice(tail.as_bytes())).await?;
    wait_until(|| rig.gps.capacity() == rig.gps.max_capacity(), "assembler drain").await?;
    rig.save.raise();

    let path = rig.csv.path().to_path_buf();
    wait_until(|| path.exists(), "CSV row commit").await?;
    let text = std::fs::read_to_string(&path)?;
    assert!(text.contains("192928.00,29.5761300"));

    rig.shutdown();
    Ok(())
}

/// The whole product loop: fixes come in, saves commit rows, the hub pulls
/// the file, and the host receives byte-for-byte what is on flash.
#[tokio::test]
async fn ingest_then_offload_round_trip() -> anyhow::Result<()> {
    let mut rig = rig();

    for (i, utc) in ["192928.00", "192930.00", "192932.00"].iter().enumerate() {
        let sentence = format!(
            "$GPGGA,{utc},2934.567{i},N,08219.765{i},W,1,08,0.9,10.0,M,-34.0,M,,*68\r\n"
        );
        rig.gps.send(Bytes::from(sentence.into_bytes())).await?;
        wait_until(|| rig.gps.capacity() == rig.gps.max_capacity(), "assembler drain").await?;
        rig.save.raise();
        wait_until(|| !rig.save.is_raised(), "flag consumption").await?;
    }

    let path = rig.csv.path().to_path_buf();
    wait_until(
        || {
            std::fs::read_to_string(&path)
                .map(|t| t.lines().count() == 4)
                .unwrap_or(false)
        },
        "three committed rows",
    )
    .await?;

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("gps_points.csv").await?;

    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);

    let on_flash = std::fs::read(&path)?;
    assert_eq!(offload.bytes, on_flash, "host bytes equal flash bytes");

    let text = String::from_utf8(offload.bytes)?;
    assert_eq!(text.lines().next().unwrap(), CSV_HEADER);
    assert_eq!(text.lines().count(), 4);

    rig.shutdown();
    Ok(())
}
