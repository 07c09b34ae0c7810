//! Black-box scenarios driving real tokio tasks over loopback TCP, matching
//! the end-to-end flows in SPEC_FULL.md §8.

use starmesh::config::{NodeConfig, NodeRole};
use starmesh::net::acceptor::Acceptor;
use starmesh::node::PeerCore;
use starmesh::store::MetadataStore;
use starmesh::tracker::Tracker;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn spawn_tracker(password: &str) -> (SocketAddr, watch::Sender<bool>) {
    let dir = tempdir().unwrap();
    let config = NodeConfig::builder(NodeRole::Tracker)
        .bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .password(password)
        .storage_root(dir.path().join("tracker"))
        .build()
        .unwrap();
    let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
    let listener = TcpListener::bind(config.bind_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = Arc::new(PeerCore::new(config.clone(), store));
    let tracker = Arc::new(Tracker::new(peer));
    let acceptor = Acceptor::new(listener, tracker, config.max_frame_len, Duration::from_millis(20));
    let (tx, rx) = watch::channel(false);
    tokio::spawn(acceptor.run(rx));
    std::mem::forget(dir); // keep the storage root alive for the test's duration
    (addr, tx)
}

async fn spawn_peer(tracker_addr: SocketAddr, password: &str) -> Arc<PeerCore> {
    let dir = tempdir().unwrap();
    let config = NodeConfig::builder(NodeRole::Peer)
        .bind_addr(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .tracker_addr(tracker_addr)
        .password(password)
        .storage_root(dir.path().join("peer"))
        .build()
        .unwrap();
    let store = MetadataStore::open_in_memory(NodeRole::Peer).unwrap();
    let listener = TcpListener::bind(config.bind_addr).await.unwrap();
    let advertised_port = listener.local_addr().unwrap().port();
    let config = NodeConfig::builder(NodeRole::Peer)
        .bind_addr(config.bind_addr)
        .advertised_port(advertised_port)
        .tracker_addr(tracker_addr)
        .password(password)
        .storage_root(config.storage_root.clone())
        .build()
        .unwrap();
    let peer = Arc::new(PeerCore::new(config.clone(), store));
    let acceptor = Acceptor::new(listener, peer.clone(), config.max_frame_len, Duration::from_millis(20));
    tokio::spawn(acceptor.run(watch::channel(false).1));
    std::mem::forget(dir);
    peer
}

#[tokio::test]
async fn bootstrap_connect_rejects_wrong_password() {
    let (tracker_addr, _shutdown) = spawn_tracker("correct-horse").await;
    let peer = spawn_peer(tracker_addr, "wrong-password").await;
    assert_eq!(peer.connect().await.unwrap(), false);
}

#[tokio::test]
async fn bootstrap_connect_accepts_correct_password() {
    let (tracker_addr, _shutdown) = spawn_tracker("correct-horse").await;
    let peer = spawn_peer(tracker_addr, "correct-horse").await;
    assert!(peer.connect().await.unwrap());
    assert!(peer.is_online());
}

#[tokio::test]
async fn write_on_one_peer_replicates_to_another() {
    let (tracker_addr, _shutdown) = spawn_tracker("pw").await;
    let writer = spawn_peer(tracker_addr, "pw").await;
    let reader = spawn_peer(tracker_addr, "pw").await;

    assert!(writer.connect().await.unwrap());
    assert!(reader.connect().await.unwrap());

    writer.write("notes/a.txt", b"hello mesh", 0).await.unwrap();

    // Replication to the tracker's own replica and to other online peers
    // happens inline inside the tracker's NEW_FILE_AVAILABLE handler, so by
    // the time `write` returns the fan-out has already been attempted.
    let mut seen = false;
    for _ in 0..20 {
        if let Ok(data) = reader.read("notes/a.txt", None, -1).await {
            assert_eq!(data, b"hello mesh");
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(seen, "reader never converged on the written file");
}

#[tokio::test]
async fn archive_bumps_version_and_preserves_old_bytes() {
    let (tracker_addr, _shutdown) = spawn_tracker("pw").await;
    let peer = spawn_peer(tracker_addr, "pw").await;
    assert!(peer.connect().await.unwrap());

    peer.write("doc.txt", b"v1 contents", 0).await.unwrap();
    assert!(peer.archive("doc.txt").await.unwrap());

    let files = peer.ls(None).await.unwrap();
    let doc = files.iter().find(|f| f.path == "doc.txt").unwrap();
    assert_eq!(doc.latest_version, 2);
}

#[tokio::test]
async fn disconnect_waits_for_sole_holder_to_replicate() {
    let (tracker_addr, _shutdown) = spawn_tracker("pw").await;
    let solo = spawn_peer(tracker_addr, "pw").await;
    assert!(solo.connect().await.unwrap());

    solo.write("only/mine.txt", b"irreplaceable", 0).await.unwrap();

    let disconnect = tokio::time::timeout(Duration::from_millis(300), solo.disconnect(true)).await;
    // No other peer ever joined, so the tracker keeps reporting should_wait
    // and the call never resolves within the timeout.
    assert!(disconnect.is_err());
}
