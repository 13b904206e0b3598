//! Integration tests for complete sessions over loopback TCP.
//!
//! Every test runs a real sender and receiver: discovery records or
//! hand-built endpoints, the handshake, the sealed channel, and the
//! transfer loops writing into a temporary download directory.

use quickshare_core::{ErrorKind, NodeError, SessionEvent, SessionEvents, TransferState};
use quickshare_discovery::{
    Discovery, DiscoveryConfig, DiscoveryEvent, EndpointId, MemoryNetwork,
};
use quickshare_files::OutgoingFile;
use quickshare_integration_tests::TwoNodeFixture;
use quickshare_integration_tests::fixtures::{endpoint_of, node_config, pattern};
use rand::RngCore;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

const MIB: usize = 1024 * 1024;

/// Drain `events` until the session ends, returning every progress
/// snapshot's `bytes_done` and the terminal state.
async fn collect_progress(mut events: SessionEvents) -> (Vec<u64>, Option<TransferState>) {
    let mut progress = Vec::new();
    let mut terminal = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ProgressUpdate(p) => progress.push(p.bytes_done),
            SessionEvent::StateChanged(state) if state.is_terminal() => terminal = Some(state),
            _ => {}
        }
    }
    (progress, terminal)
}

// ============================================================================
// Transfer Integration Tests
// ============================================================================

/// 10 MiB in 64 KiB chunks completes with exactly 160 chunk steps.
#[tokio::test]
async fn test_ten_mib_in_64k_chunks() {
    let fixture = TwoNodeFixture::with_config(|_| {}, |_| {}).await.unwrap();
    let mut contents = vec![0u8; 10 * MIB];
    rand::thread_rng().fill_bytes(&mut contents);
    let path = fixture.write_source("archive.bin", &contents).unwrap();

    let outbound = fixture
        .sender
        .send_files(&fixture.receiver_endpoint(), vec![path])
        .await
        .unwrap();
    let sender_events = outbound.subscribe();

    // Receiver decides only after the sender is being watched
    let inbound = fixture.receiver.accept_incoming().await.unwrap();
    let mut receiver_events = inbound.subscribe();
    loop {
        match receiver_events.recv().await {
            Some(SessionEvent::ManifestOffered(items)) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].name, "archive.bin");
                assert_eq!(items[0].size, (10 * MIB) as u64);
                break;
            }
            Some(_) => {}
            None => panic!("session ended before the manifest arrived"),
        }
    }
    fixture.receiver.accept_transfer(inbound.id()).unwrap();

    let (progress, terminal) = collect_progress(sender_events).await;
    assert_eq!(terminal, Some(TransferState::Completed));
    assert_eq!(progress.len(), 160);
    assert_eq!(progress.last().copied(), Some((10 * MIB) as u64));
    assert!(progress.windows(2).all(|w| w[1] - w[0] == 64 * 1024));

    assert_eq!(inbound.wait().await, TransferState::Completed);
    assert_eq!(std::fs::read(fixture.received("archive.bin")).unwrap(), contents);
    assert!(!fixture.received("archive.bin.part").exists());
}

/// Several files, including an empty one, arrive intact and in order.
#[tokio::test]
async fn test_multiple_files() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let a = fixture.write_source("a.txt", b"first").unwrap();
    let empty = fixture.write_source("empty.dat", b"").unwrap();
    let c = fixture.write_source("c.bin", &pattern(300_000)).unwrap();

    let outbound = fixture
        .sender
        .send_files(&fixture.receiver_endpoint(), vec![a, empty, c])
        .await
        .unwrap();
    let inbound = fixture.receiver.accept_incoming().await.unwrap();

    assert_eq!(outbound.wait().await, TransferState::Completed);
    assert_eq!(inbound.wait().await, TransferState::Completed);
    assert_eq!(std::fs::read(fixture.received("a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(fixture.received("empty.dat")).unwrap(), b"");
    assert_eq!(
        std::fs::read(fixture.received("c.bin")).unwrap(),
        pattern(300_000)
    );
}

/// An existing file with the same name is never overwritten.
#[tokio::test]
async fn test_existing_file_is_kept() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    std::fs::write(fixture.received("report.pdf"), b"mine").unwrap();
    let path = fixture.write_source("report.pdf", b"theirs").unwrap();

    let outbound = fixture
        .sender
        .send_files(&fixture.receiver_endpoint(), vec![path])
        .await
        .unwrap();
    fixture.receiver.accept_incoming().await.unwrap();

    assert_eq!(outbound.wait().await, TransferState::Completed);
    assert_eq!(std::fs::read(fixture.received("report.pdf")).unwrap(), b"mine");
    assert_eq!(
        std::fs::read(fixture.received("report (1).pdf")).unwrap(),
        b"theirs"
    );
}

/// Content that no longer matches its hash fails both sides and keeps the
/// partial file.
#[tokio::test]
async fn test_integrity_failure_keeps_partial_file() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let path = fixture.write_source("photo.jpg", &pattern(200_000)).unwrap();

    // Hash is taken here; the bytes change afterwards
    let file = OutgoingFile::open(&path).await.unwrap();
    let mut tampered = pattern(200_000);
    tampered[150_000] ^= 0xFF;
    std::fs::write(&path, &tampered).unwrap();

    let outbound = fixture
        .sender
        .connect(&fixture.receiver_endpoint())
        .await
        .unwrap();
    outbound.send_files(vec![file]).unwrap();
    let inbound = fixture.receiver.accept_incoming().await.unwrap();

    assert_eq!(
        inbound.wait().await,
        TransferState::Failed(ErrorKind::IntegrityFailure)
    );
    assert_eq!(
        outbound.wait().await,
        TransferState::Failed(ErrorKind::IntegrityFailure)
    );
    assert!(!fixture.received("photo.jpg").exists());
    assert_eq!(
        std::fs::read(fixture.received("photo.jpg.part")).unwrap(),
        tampered
    );
}

/// Cancelling stops writes at the next chunk boundary: the partial file
/// holds exactly the bytes reported before the end and stops growing.
#[tokio::test]
async fn test_cancel_halts_writes_within_a_chunk() {
    const CHUNK: usize = 4 * 1024;
    let fixture = TwoNodeFixture::with_config(
        |sender| sender.transfer.chunk_size = CHUNK,
        |receiver| receiver.transfer.auto_accept = true,
    )
    .await
    .unwrap();
    let total = 16 * MIB;
    let path = fixture.write_source("movie.mkv", &pattern(total)).unwrap();

    let outbound = fixture
        .sender
        .send_files(&fixture.receiver_endpoint(), vec![path])
        .await
        .unwrap();
    let inbound = fixture.receiver.accept_incoming().await.unwrap();

    let mut events = inbound.subscribe();
    let mut last_reported = 0;
    let mut cancelled = false;
    let mut terminal = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ProgressUpdate(p) => {
                last_reported = p.bytes_done;
                if !cancelled && p.bytes_done > 0 {
                    inbound.cancel();
                    cancelled = true;
                }
            }
            SessionEvent::StateChanged(state) if state.is_terminal() => terminal = Some(state),
            _ => {}
        }
    }

    assert_eq!(terminal, Some(TransferState::Cancelled));
    assert_eq!(outbound.wait().await, TransferState::Cancelled);

    let part = fixture.received("movie.mkv.part");
    let kept = std::fs::metadata(&part).unwrap().len();
    assert_eq!(kept, last_reported);
    assert!(kept < total as u64);
    assert_eq!(kept % CHUNK as u64, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(std::fs::metadata(&part).unwrap().len(), kept);
    assert!(!fixture.received("movie.mkv").exists());
}

/// The sender cancelling ends the receiver too.
#[tokio::test]
async fn test_sender_cancel_reaches_receiver() {
    let fixture = TwoNodeFixture::with_config(|_| {}, |_| {}).await.unwrap();
    let path = fixture.write_source("a.bin", &pattern(1000)).unwrap();

    let outbound = fixture
        .sender
        .send_files(&fixture.receiver_endpoint(), vec![path])
        .await
        .unwrap();
    let inbound = fixture.receiver.accept_incoming().await.unwrap();

    // Receiver is waiting for the user; the sender gives up
    let mut events = inbound.subscribe();
    while let Some(event) = events.recv().await {
        if matches!(event, SessionEvent::ManifestOffered(_)) {
            break;
        }
    }
    fixture.sender.cancel(outbound.id()).unwrap();

    assert_eq!(outbound.wait().await, TransferState::Cancelled);
    assert_eq!(inbound.wait().await, TransferState::Cancelled);
    assert!(matches!(inbound.accept(), Err(NodeError::Channel(_))));
}

// ============================================================================
// Session Manager Integration Tests
// ============================================================================

/// Two concurrent connects to one endpoint: exactly one wins.
#[tokio::test]
async fn test_concurrent_connect_conflict() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let endpoint = fixture.receiver_endpoint();

    let (first, second) = tokio::join!(
        fixture.sender.connect(&endpoint),
        fixture.sender.connect(&endpoint)
    );
    let (winner, loser) = match (first, second) {
        (Ok(handle), Err(err)) | (Err(err), Ok(handle)) => (handle, err),
        (first, second) => panic!("expected one winner, got {first:?} and {second:?}"),
    };
    assert!(matches!(loser, NodeError::SessionConflict(ref id) if *id == endpoint.id));
    assert_eq!(loser.kind(), Some(ErrorKind::SessionConflict));
    assert_eq!(fixture.sender.list_active().len(), 1);

    winner.cancel();
    assert_eq!(winner.wait().await, TransferState::Cancelled);
}

/// A second device claiming the same endpoint id is turned away by the
/// receiver while the first session is live.
#[tokio::test]
async fn test_inbound_conflict_is_rejected() {
    let fixture = TwoNodeFixture::with_config(|_| {}, |_| {}).await.unwrap();
    let endpoint = fixture.receiver_endpoint();

    let first = fixture.sender.connect(&endpoint).await.unwrap();
    let inbound = fixture.receiver.accept_incoming().await.unwrap();
    assert_eq!(inbound.peer().endpoint_id.as_str(), "SEND");

    let dir = tempfile::tempdir().unwrap();
    let impostor = quickshare_core::SessionManager::bind(node_config("SEND", dir.path()))
        .await
        .unwrap();
    let _second = impostor.connect(&endpoint).await;

    assert!(matches!(
        fixture.receiver.accept_incoming().await,
        Err(NodeError::SessionConflict(_))
    ));
    assert_eq!(fixture.receiver.list_active().len(), 1);

    first.cancel();
    assert_eq!(first.wait().await, TransferState::Cancelled);
}

/// Every session derives its own keys.
#[tokio::test]
async fn test_sessions_use_distinct_keys() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let path = fixture.write_source("k.txt", b"key material").unwrap();
    let endpoint = fixture.receiver_endpoint();

    let mut fingerprints = Vec::new();
    for _ in 0..3 {
        let outbound = fixture
            .sender
            .send_files(&endpoint, vec![path.clone()])
            .await
            .unwrap();
        let inbound = fixture.receiver.accept_incoming().await.unwrap();
        assert_eq!(outbound.key_fingerprint(), inbound.key_fingerprint());
        assert_eq!(outbound.auth_code(), inbound.auth_code());

        assert_eq!(outbound.wait().await, TransferState::Completed);
        assert_eq!(inbound.wait().await, TransferState::Completed);
        fingerprints.push(outbound.key_fingerprint());
    }

    assert_ne!(fingerprints[0], fingerprints[1]);
    assert_ne!(fingerprints[1], fingerprints[2]);
    assert_ne!(fingerprints[0], fingerprints[2]);
}

/// Mismatched preshared secrets never produce a session.
#[tokio::test]
async fn test_preshared_key_mismatch() {
    use quickshare_crypto::Trust;

    let fixture = TwoNodeFixture::with_config(
        |sender| sender.trust = Trust::PreShared([1; 32]),
        |receiver| receiver.trust = Trust::PreShared([2; 32]),
    )
    .await
    .unwrap();

    let err = fixture
        .sender
        .connect(&fixture.receiver_endpoint())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::HandshakeFailed));
    assert!(fixture.receiver.accept_incoming().await.is_err());
    assert!(fixture.sender.list_active().is_empty());
    assert!(fixture.receiver.list_active().is_empty());
}

// ============================================================================
// Discovery to Transfer
// ============================================================================

/// A receiver found through discovery can be sent to directly.
#[tokio::test]
async fn test_discovered_endpoint_receives_files() {
    let fixture = TwoNodeFixture::new().await.unwrap();
    let network = MemoryNetwork::new();
    let config = DiscoveryConfig {
        announce_interval: Duration::from_millis(100),
        ..DiscoveryConfig::default()
    };

    let advertiser = Discovery::new(
        Arc::new(network.backend(IpAddr::V4(Ipv4Addr::LOCALHOST))),
        config.clone(),
    );
    let browser = Discovery::new(
        Arc::new(network.backend(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)))),
        config,
    );

    let mut events = browser.browse().unwrap();
    advertiser
        .start_advertising(fixture.receiver.endpoint_info())
        .await
        .unwrap();

    let endpoint = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.next().await {
                Some(Ok(DiscoveryEvent::Found(endpoint))) => break endpoint,
                Some(_) => continue,
                None => panic!("browse ended"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(endpoint.id, EndpointId::parse("RECV").unwrap());
    assert_eq!(endpoint, endpoint_of(&fixture.receiver));

    let path = fixture.write_source("found.txt", b"over the air").unwrap();
    let outbound = fixture.sender.send_files(&endpoint, vec![path]).await.unwrap();
    fixture.receiver.accept_incoming().await.unwrap();

    assert_eq!(outbound.wait().await, TransferState::Completed);
    assert_eq!(
        std::fs::read(fixture.received("found.txt")).unwrap(),
        b"over the air"
    );
}
