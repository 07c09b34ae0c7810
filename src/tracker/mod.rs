//! Tracker runtime (C7): the tracker is a specialized peer built by
//! composition. A [`Tracker`] owns a [`PeerCore`] and extends its handler
//! table with the authoritative-metadata routines; every kind the tracker
//! does not override is delegated straight through to the wrapped
//! [`PeerCore`]'s own dispatch.

use crate::net::acceptor::Dispatcher;
use crate::node::PeerCore;
use crate::protocol::{FileModel, Message, PeerInfo, PeerState};
use crate::store::UpsertFileInput;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Tracker {
    pub peer: Arc<PeerCore>,
}

impl Tracker {
    pub fn new(peer: Arc<PeerCore>) -> Self {
        Self { peer }
    }

    /// Best-effort membership check keyed on the connecting socket's
    /// address: the gate asks "is some online peer recorded at this host",
    /// since several request kinds (LIST_REQUEST, ARCHIVE_REQUEST, …) carry
    /// no advertised port of their own to key a precise lookup on.
    async fn sender_is_online(&self, peer_addr: SocketAddr) -> bool {
        let host = peer_addr.ip().to_string();
        self.peer
            .store
            .list_peers()
            .await
            .map(|peers| {
                peers
                    .iter()
                    .any(|p| p.host == host && p.state == PeerState::Online)
            })
            .unwrap_or(false)
    }

    async fn handle_connect_request(&self, msg: Message, peer_addr: SocketAddr) -> Message {
        let Message::ConnectRequest {
            password,
            port,
            max_file_size,
            max_file_sys_size,
            curr_file_sys_size,
        } = msg.clone()
        else {
            unreachable!("dispatch only calls this for ConnectRequest");
        };

        if password != self.peer.config.password {
            warn!(peer = %peer_addr, "connect request rejected: wrong password");
            return Message::ConnectResponse { successful: false };
        }

        let host = peer_addr.ip().to_string();
        let capacity = crate::config::Capacity {
            max_file_size,
            max_file_sys_size,
            curr_file_sys_size,
        };
        let _ = self
            .peer
            .store
            .upsert_peer(&host, port, PeerState::Online, Some(capacity))
            .await;
        info!(peer = %peer_addr, port, "peer connected");

        if let Ok(peers) = self.peer.store.list_peers().await {
            for other in peers {
                if other.host == host && other.port == port {
                    continue;
                }
                if other.state != PeerState::Online {
                    continue;
                }
                let _ = self
                    .peer
                    .connections
                    .request(
                        &other.host,
                        other.port,
                        &msg,
                        self.peer.config.connect_timeout,
                        self.peer.config.max_frame_len,
                    )
                    .await;
            }
        }

        Message::ConnectResponse { successful: true }
    }

    async fn handle_disconnect_request(&self, msg: Message, peer_addr: SocketAddr) -> Message {
        let Message::DisconnectRequest {
            check_for_unreplicated,
            port,
        } = msg
        else {
            unreachable!("dispatch only calls this for DisconnectRequest");
        };
        let host = peer_addr.ip().to_string();

        if check_for_unreplicated
            && self
                .peer
                .store
                .has_unreplicated_files(&host, port)
                .await
                .unwrap_or(false)
        {
            return Message::DisconnectResponse { should_wait: true };
        }

        let _ = self
            .peer
            .store
            .update_peer_state(&host, port, PeerState::Offline)
            .await;
        info!(peer = %peer_addr, port, "peer disconnected");

        if let Ok(peers) = self.peer.store.list_peers().await {
            for other in peers {
                if other.host == host && other.port == port {
                    continue;
                }
                if other.state != PeerState::Online {
                    continue;
                }
                let _ = self
                    .peer
                    .connections
                    .request(
                        &other.host,
                        other.port,
                        &Message::DisconnectRequest {
                            check_for_unreplicated: false,
                            port,
                        },
                        self.peer.config.connect_timeout,
                        self.peer.config.max_frame_len,
                    )
                    .await;
            }
        }

        Message::DisconnectResponse { should_wait: false }
    }

    async fn handle_peer_list_request(&self, file_path: Option<String>) -> Message {
        let records = match file_path {
            Some(path) => self.peer.store.get_peers_for_file(&path).await,
            None => self.peer.store.list_peers().await,
        }
        .unwrap_or_default();

        Message::PeerList {
            peers: records
                .into_iter()
                .map(|p| PeerInfo {
                    host: p.host,
                    port: p.port,
                    display_name: p.display_name,
                    state: p.state,
                })
                .collect(),
        }
    }

    /// `NEW_FILE_AVAILABLE`: record the uploader as a holder, keep the
    /// tracker's own replica current, and fan the notification out to
    /// every other online peer up to the configured replication level so
    /// each independently pulls a copy.
    async fn handle_new_file_available(&self, file: FileModel, port: u16, peer_addr: SocketAddr) {
        let host = peer_addr.ip().to_string();
        let _ = self
            .peer
            .store
            .upsert_file(UpsertFileInput {
                path: file.path.clone(),
                is_dir: file.is_dir,
                checksum: file.checksum.clone(),
                size: file.size,
                latest_version: Some(file.latest_version),
            })
            .await;
        let _ = self
            .peer
            .store
            .add_file_peer_entry(&file.path, &host, port, file.checksum.clone())
            .await;

        let source = PeerInfo {
            host: host.clone(),
            port,
            display_name: None,
            state: PeerState::Online,
        };

        if let Err(e) = self
            .peer
            .download_file(&file.path, Some(vec![source.clone()]))
            .await
        {
            warn!(path = %file.path, error = %e, "tracker failed to pull its own replica");
        }

        if let Ok(candidates) = self
            .peer
            .store
            .get_replication_candidates(&file.path, &host, port, self.peer.config.replication_level)
            .await
        {
            for candidate in candidates {
                let _ = self
                    .peer
                    .connections
                    .request(
                        &candidate.host,
                        candidate.port,
                        &Message::NewFileAvailable {
                            file: file.without_data(),
                            port,
                        },
                        self.peer.config.connect_timeout,
                        self.peer.config.max_frame_len,
                    )
                    .await;
            }
        }
    }

    /// `FILE_CHANGED` carries two distinct meanings that the wire message
    /// does not distinguish by kind, only by content: a peer confirming it
    /// now holds the file unchanged (checksum and version match the
    /// authoritative record — just update that peer's holder entry), or a
    /// peer reporting an actual content change (checksum or version
    /// differs — update the authoritative record, refresh the tracker's
    /// own replica if it holds one, and fan the change out to every other
    /// current holder). Collapsing both into the second path would turn
    /// every "I still have it" confirmation into a broadcast storm.
    async fn handle_file_changed(
        &self,
        file: FileModel,
        port: u16,
        start_offset: u64,
        peer_addr: SocketAddr,
    ) {
        let host = peer_addr.ip().to_string();
        let existing = self.peer.store.get_file(&file.path).await.ok().flatten();
        let unchanged = existing
            .as_ref()
            .map(|e| e.golden_checksum == file.checksum && e.latest_version == file.latest_version)
            .unwrap_or(false);

        if unchanged {
            let _ = self
                .peer
                .store
                .add_file_peer_entry(&file.path, &host, port, file.checksum.clone())
                .await;
            return;
        }

        let _ = self
            .peer
            .store
            .upsert_file(UpsertFileInput {
                path: file.path.clone(),
                is_dir: file.is_dir,
                checksum: file.checksum.clone(),
                size: file.size,
                latest_version: Some(file.latest_version),
            })
            .await;
        let _ = self
            .peer
            .store
            .add_file_peer_entry(&file.path, &host, port, file.checksum.clone())
            .await;

        if self
            .peer
            .store
            .file_exists_locally(&file.path)
            .await
            .unwrap_or(false)
        {
            let source = PeerInfo {
                host: host.clone(),
                port,
                display_name: None,
                state: PeerState::Online,
            };
            if let Err(e) = self.peer.download_file(&file.path, Some(vec![source])).await {
                warn!(path = %file.path, error = %e, "tracker failed to refresh its own replica");
            }
        }

        if let Ok(holders) = self.peer.store.get_peers_for_file(&file.path).await {
            for holder in holders {
                if holder.host == host && holder.port == port {
                    continue;
                }
                let _ = self
                    .peer
                    .connections
                    .request(
                        &holder.host,
                        holder.port,
                        &Message::FileChanged {
                            file: file.without_data(),
                            port,
                            start_offset,
                        },
                        self.peer.config.connect_timeout,
                        self.peer.config.max_frame_len,
                    )
                    .await;
            }
        }
    }

    /// `ARCHIVE_REQUEST`: bump the version, duplicate the tracker's own
    /// blob if it holds one, and notify every holder.
    async fn handle_archive_request(&self, file_path: &str) -> Message {
        match self.peer.store.archive_file(file_path).await {
            Ok(Some(new_version)) => {
                if self
                    .peer
                    .store
                    .file_exists_locally(file_path)
                    .await
                    .unwrap_or(false)
                {
                    let _ = self.peer.fs.copy_version(file_path, new_version - 1, new_version);
                }
                if let Ok(holders) = self.peer.store.get_peers_for_file(file_path).await {
                    for holder in holders {
                        let _ = self
                            .peer
                            .connections
                            .request(
                                &holder.host,
                                holder.port,
                                &Message::FileArchived {
                                    file_path: file_path.to_string(),
                                    new_version,
                                },
                                self.peer.config.connect_timeout,
                                self.peer.config.max_frame_len,
                            )
                            .await;
                    }
                }
                Message::ArchiveResponse {
                    file_path: file_path.to_string(),
                    archived: true,
                }
            }
            _ => Message::ArchiveResponse {
                file_path: file_path.to_string(),
                archived: false,
            },
        }
    }

    async fn handle_validate_checksum(&self, file_path: &str, checksum: &[u8]) -> Message {
        let valid = self
            .peer
            .store
            .get_file(file_path)
            .await
            .ok()
            .flatten()
            .map(|f| f.golden_checksum == checksum)
            .unwrap_or(false);
        Message::ValidateChecksumResponse {
            file_path: file_path.to_string(),
            valid,
        }
    }

    /// `DELETE_REQUEST`: approve whenever the file is on record. The
    /// version history (and the tracker's own `files`/`versions` rows) is
    /// retained rather than purged here; only the live blob on each
    /// holder, cleaned up through the caller's `DELETE` fan-out after
    /// approval, actually goes away.
    async fn handle_delete_request(&self, file_path: &str) -> Message {
        let can_delete = self
            .peer
            .store
            .get_file(file_path)
            .await
            .ok()
            .flatten()
            .is_some();
        Message::DeleteResponse {
            file_path: file_path.to_string(),
            can_delete,
        }
    }

    async fn handle_move_request(&self, source_path: &str, dest_path: &str) -> Message {
        let source_exists = self
            .peer
            .store
            .get_file(source_path)
            .await
            .ok()
            .flatten()
            .is_some();
        let dest_exists = self
            .peer
            .store
            .get_file(dest_path)
            .await
            .ok()
            .flatten()
            .is_some();
        let valid = source_exists && !dest_exists;
        if valid {
            let _ = self.peer.store.rename_file(source_path, dest_path).await;
        }
        Message::MoveResponse { valid }
    }
}

#[async_trait]
impl Dispatcher for Tracker {
    async fn dispatch(&self, msg: Message, peer_addr: SocketAddr) -> Option<Message> {
        if matches!(msg, Message::ConnectRequest { .. }) {
            return Some(self.handle_connect_request(msg, peer_addr).await);
        }

        if !self.sender_is_online(peer_addr).await {
            warn!(peer = %peer_addr, kind = msg.kind_name(), "rejecting request from an offline or unknown peer");
            return None;
        }

        match msg {
            Message::DisconnectRequest { .. } => {
                Some(self.handle_disconnect_request(msg, peer_addr).await)
            }
            Message::PeerListRequest { file_path } => {
                Some(self.handle_peer_list_request(file_path).await)
            }
            Message::NewFileAvailable { file, port } => {
                self.handle_new_file_available(file, port, peer_addr).await;
                None
            }
            Message::FileChanged { file, port, start_offset } => {
                self.handle_file_changed(file, port, start_offset, peer_addr)
                    .await;
                None
            }
            Message::ArchiveRequest { file_path } => {
                Some(self.handle_archive_request(&file_path).await)
            }
            Message::ValidateChecksumRequest { file_path, checksum } => {
                Some(self.handle_validate_checksum(&file_path, &checksum).await)
            }
            Message::DeleteRequest { file_path } => {
                Some(self.handle_delete_request(&file_path).await)
            }
            Message::MoveRequest { source_path, dest_path } => {
                Some(self.handle_move_request(&source_path, &dest_path).await)
            }
            Message::ListRequest { .. }
            | Message::FileDownloadRequest { .. }
            | Message::FileArchived { .. }
            | Message::Delete { .. }
            | Message::Move { .. } => self.peer.dispatch(msg, peer_addr).await,
            other => {
                warn!(peer = %peer_addr, kind = other.kind_name(), "tracker has no handler for this message kind");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Capacity, NodeConfig, NodeRole};
    use crate::store::MetadataStore;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn tracker() -> Tracker {
        let config = NodeConfig::builder(NodeRole::Tracker)
            .advertised_port(9000)
            .password("secret")
            .capacity(Capacity::default())
            .build()
            .unwrap();
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        Tracker::new(Arc::new(PeerCore::new(config, store)))
    }

    #[tokio::test]
    async fn connect_request_with_wrong_password_is_rejected() {
        let t = tracker().await;
        let reply = t
            .handle_connect_request(
                Message::ConnectRequest {
                    password: "nope".into(),
                    port: 1,
                    max_file_size: 0,
                    max_file_sys_size: 0,
                    curr_file_sys_size: 0,
                },
                peer_addr(1),
            )
            .await;
        assert_eq!(reply, Message::ConnectResponse { successful: false });
    }

    #[tokio::test]
    async fn connect_request_with_correct_password_registers_peer_online() {
        let t = tracker().await;
        let reply = t
            .handle_connect_request(
                Message::ConnectRequest {
                    password: "secret".into(),
                    port: 5000,
                    max_file_size: 0,
                    max_file_sys_size: 0,
                    curr_file_sys_size: 0,
                },
                peer_addr(1),
            )
            .await;
        assert_eq!(reply, Message::ConnectResponse { successful: true });
        let peers = t.peer.store.list_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].port, 5000);
    }

    #[tokio::test]
    async fn disconnect_waits_while_files_are_unreplicated() {
        let t = tracker().await;
        t.peer
            .store
            .upsert_file(UpsertFileInput {
                path: "solo.txt".into(),
                is_dir: false,
                checksum: vec![1],
                size: 1,
                latest_version: None,
            })
            .await
            .unwrap();
        t.peer
            .store
            .upsert_peer("127.0.0.1", 5000, PeerState::Online, None)
            .await
            .unwrap();
        t.peer
            .store
            .add_file_peer_entry("solo.txt", "127.0.0.1", 5000, vec![1])
            .await
            .unwrap();

        let reply = t
            .handle_disconnect_request(
                Message::DisconnectRequest {
                    check_for_unreplicated: true,
                    port: 5000,
                },
                peer_addr(1),
            )
            .await;
        assert_eq!(reply, Message::DisconnectResponse { should_wait: true });
    }

    #[tokio::test]
    async fn delete_request_is_approved_only_for_known_files() {
        let t = tracker().await;
        let reply = t.handle_delete_request("missing.txt").await;
        assert_eq!(
            reply,
            Message::DeleteResponse {
                file_path: "missing.txt".into(),
                can_delete: false
            }
        );

        t.peer
            .store
            .upsert_file(UpsertFileInput {
                path: "a.txt".into(),
                is_dir: false,
                checksum: vec![1],
                size: 1,
                latest_version: None,
            })
            .await
            .unwrap();
        let reply = t.handle_delete_request("a.txt").await;
        assert_eq!(
            reply,
            Message::DeleteResponse {
                file_path: "a.txt".into(),
                can_delete: true
            }
        );
    }

    #[tokio::test]
    async fn move_request_is_invalid_when_destination_exists() {
        let t = tracker().await;
        for path in ["a.txt", "b.txt"] {
            t.peer
                .store
                .upsert_file(UpsertFileInput {
                    path: path.into(),
                    is_dir: false,
                    checksum: vec![1],
                    size: 1,
                    latest_version: None,
                })
                .await
                .unwrap();
        }
        let reply = t.handle_move_request("a.txt", "b.txt").await;
        assert_eq!(reply, Message::MoveResponse { valid: false });
    }
}
