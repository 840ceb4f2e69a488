//! Discovery and lifecycle scenarios: pending requests, the connected
//! callback, and link supervision across drops.

use crate::*;
use trellis_core::frame::{HostMessageType, HostStatus};

/// A request made before discovery completes parks in the pending slot and
/// goes out exactly once when the link becomes ready.
#[tokio::test]
async fn early_request_is_parked_and_flushed_once() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "x.csv", b"parked request payload");

    // The link is still coming up (scan, connect, discovery, subscribe);
    // this request cannot go out yet.
    rig.hub.request_log("x.csv").await?;

    expect_status(&mut rig, HostStatus::LinkUp).await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, b"parked request payload");

    // Exactly one START_TRANSFER went out: the wire stays quiet after.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(rig.host.drain().is_empty(), "no second transfer appears");

    rig.shutdown();
    Ok(())
}

/// A newer parked request supersedes an older one; only the newest file is
/// transferred.
#[tokio::test]
async fn newest_parked_request_wins() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "old.csv", b"superseded");
    seed_file(&rig, "new.csv", b"the one that counts");

    rig.hub.request_log("old.csv").await?;
    rig.hub.request_log("new.csv").await?;

    expect_status(&mut rig, HostStatus::LinkUp).await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, b"the one that counts");

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn connected_watch_tracks_the_link() -> anyhow::Result<()> {
    let mut rig = rig();

    rig.wait_connected().await?;
    assert!(*rig.hub.connected.borrow());

    rig.carrier.drop_link().await;
    let mut connected = rig.hub.connected.clone();
    tokio::time::timeout(WAIT, async {
        while *connected.borrow_and_update() {
            connected.changed().await.unwrap();
        }
    })
    .await?;

    // Supervision recovers without any application involvement.
    rig.wait_connected().await?;

    rig.shutdown();
    Ok(())
}

#[tokio::test]
async fn host_sees_link_up_and_link_down() -> anyhow::Result<()> {
    let mut rig = rig();

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;

    rig.carrier.drop_link().await;
    expect_status(&mut rig, HostStatus::LinkDown).await?;

    // And up again after the automatic reconnect.
    expect_status(&mut rig, HostStatus::LinkUp).await?;

    rig.shutdown();
    Ok(())
}

/// A request parked while disconnected survives a full scan/connect/
/// discovery cycle and transfers after the link comes back.
#[tokio::test]
async fn parked_request_survives_reconnect() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "later.csv", b"delivered on the second link");

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;
    rig.carrier.drop_link().await;
    expect_status(&mut rig, HostStatus::LinkDown).await?;

    // Parked while the link is down.
    rig.hub.request_log("later.csv").await?;

    expect_status(&mut rig, HostStatus::LinkUp).await?;
    let offload = collect_offload(&mut rig).await?;
    assert_eq!(offload.terminal, HostStatus::TransferDone);
    assert_eq!(offload.bytes, b"delivered on the second link");

    rig.shutdown();
    Ok(())
}

/// Stray notifications on unexpected handles never reach the host stream.
#[tokio::test]
async fn clean_stream_between_sessions() -> anyhow::Result<()> {
    let mut rig = rig();
    seed_file(&rig, "a.csv", b"first");
    seed_file(&rig, "b.csv", b"second");

    rig.wait_connected().await?;
    expect_status(&mut rig, HostStatus::LinkUp).await?;

    for (name, body) in [("a.csv", &b"first"[..]), ("b.csv", &b"second"[..])] {
        rig.hub.request_log(name).await?;
        let offload = collect_offload(&mut rig).await?;
        assert_eq!(offload.terminal, HostStatus::TransferDone);
        assert_eq!(offload.bytes, body);
        assert!(offload.other_statuses.is_empty());
    }

    // Nothing left on the wire after the second session.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let leftovers = rig.host.drain();
    assert!(
        leftovers.iter().all(|(t, _)| *t != HostMessageType::LogLine),
        "no stray log-lines between sessions"
    );

    rig.shutdown();
    Ok(())
}
