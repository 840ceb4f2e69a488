//! End-to-end offload scenarios: the full request → chunks → terminal
//! status path across both stacks and the carrier.

use crate::*;
use trellis_core::frame::HostStatus;

/// MTU 23 (18-byte chunk payloads), 46-byte file: the host sees
/// transfer-start, log-lines of 18/18/10 bytes, transfer-done, and the
/// reassembled bytes equal the file exactly.
#[tokio::test]
async fn full_offload_delivers_every_byte_in_order() -> anyhow::Result<()> {
    let mut rig = rig();
    let contents = b"utc_time,lat\n192928.00,29.6500000\n192928.01,X\n";
    assert_eq!(contents.len(), 46);
    seed_file(&rig, "gps.csv", contents);

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("gps.csv").await?;

    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.line_lens, vec![18, 18, 10]);
    assert_eq!(offload.bytes, contents);

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn missing_file_reports_error_without_chunks() -> anyhow::Result<()> {
    let mut rig = rig();
    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;

    rig.hub.request_log("not-there.csv").await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferError);
    assert!(offload.bytes.is_empty());

    // The shears stayed IDLE: a follow-up request succeeds.
    seed_file(&rig, "now-there.csv", b"late arrival");
    rig.hub.request_log("now-there.csv").await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, b"late arrival");

    rig.shutdown();
    Ok(())
}

/// A second request during an active session draws BUSY (surfacing as one
/// transfer-error) while the original session runs to completion intact.
#[tokio::test]
async fn second_request_is_rejected_and_first_completes() -> anyhow::Result<()> {
    let mut rig = rig();
    // Long enough that the second request lands mid-stream.
    let contents: Vec<u8> = (0..900u32).map(|i| (i % 251) as u8).collect();
    seed_file(&rig, "big.csv", &contents);
    seed_file(&rig, "other.csv", b"never sent");

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("big.csv").await?;
    expect_status(&mut rig, HostStatus::TransferStart).await?;

    rig.hub.request_log("other.csv").await?;

    // Collect to the end of the first session. The BUSY rejection shows up
    // as exactly one transfer-error somewhere in the middle.
    let mut bytes = Vec::new();
    let mut errors = 0;
    loop {
        let (msg_type, payload) = next_frame(&mut rig).await?;
        match msg_type {
            trellis_core::frame::HostMessageType::LogLine => bytes.extend_from_slice(&payload),
            trellis_core::frame::HostMessageType::Status => {
                match HostStatus::try_from(payload[0])? {
                    HostStatus::TransferError => errors += 1,
                    HostStatus::TransferDone => break,
                    other => panic!("unexpected status {other:?}"),
                }
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(errors, 1, "the rejected request surfaces exactly once");
    assert_eq!(bytes, contents, "the original session is untouched");

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn empty_file_offloads_with_zero_log_lines() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "empty.csv", b"");

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("empty.csv").await?;

    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert!(offload.line_lens.is_empty());

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn exact_chunk_multiple_has_no_trailing_empty_line() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "even.csv", &[0x42; 36]); // exactly two 18-byte chunks

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("even.csv").await?;

    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.line_lens, vec![18, 18]);

    rig.shutdown();
    Ok(())
}

/// A roomy link still caps chunks at the 160-byte protocol maximum.
#[tokio::test]
async fn generous_link_caps_chunk_payload() -> anyhow::Result<()> {
    let mut rig = rig_with_att(244);
    seed_file(&rig, "wide.csv", &[7u8; 400]);

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("wide.csv").await?;

    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.line_lens, vec![160, 160, 80]);
    assert_eq!(offload.bytes, vec![7u8; 400]);

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn abort_mid_transfer_surfaces_as_error_and_recovers() -> anyhow::Result<()> {
    let mut rig = rig();
    let contents: Vec<u8> = (0..2000u32).map(|i| (i % 199) as u8).collect();
    seed_file(&rig, "long.csv", &contents);

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("long.csv").await?;
    expect_status(&mut rig, HostStatus::TransferStart).await?;

    // Let a few chunks through, then pull the plug from the application.
    let (msg_type, _) = next_frame(&mut rig).await?;
    assert_eq!(msg_type, trellis_core::frame::HostMessageType::LogLine);
    rig.hub.abort_transfer().await?;

    let mut saw_error = false;
    for _ in 0..contents.len() {
        let (msg_type, payload) = next_frame(&mut rig).await?;
        if msg_type == trellis_core::frame::HostMessageType::Status {
            assert_eq!(HostStatus::try_from(payload[0])?, HostStatus::TransferError);
            saw_error = true;
            break;
        }
    }
    assert!(saw_error, "aborted session must surface transfer-error");

    // The server is back in IDLE; the same file offloads cleanly now.
    rig.hub.request_log("long.csv").await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, contents);

    rig.shutdown();
    Ok(())
}

/// Link loss mid-transfer: no terminal transfer status crosses the wire,
/// the host sees link-down, and a fresh connection re-runs the offload
/// from the start.
#[tokio::test]
async fn link_loss_cancels_silently_and_fresh_transfer_succeeds() -> anyhow::Result<()> {
    let mut rig = rig();
    let contents: Vec<u8> = (0..2000u32).map(|i| (i % 241) as u8).collect();
    seed_file(&rig, "cutoff.csv", &contents);

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("cutoff.csv").await?;
    expect_status(&mut rig, HostStatus::TransferStart).await?;
    let (msg_type, _) = next_frame(&mut rig).await?;
    assert_eq!(msg_type, trellis_core::frame::HostMessageType::LogLine);

    rig.carrier.drop_link().await;

    // Everything until link-down must be data — never transfer-done or
    // transfer-error.
    loop {
        let (msg_type, payload) = next_frame(&mut rig).await?;
        if msg_type == trellis_core::frame::HostMessageType::Status {
            assert_eq!(HostStatus::try_from(payload[0])?, HostStatus::LinkDown);
            break;
        }
    }

    // Both sides recover on their own: shears re-advertises, hub rescans.
    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.hub.request_log("cutoff.csv").await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, contents, "fresh transfer starts from byte zero");

    rig.shutdown();
    Ok(())
}
