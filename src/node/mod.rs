//! Peer runtime (C6): client operations plus the default inbound handler
//! table for a peer. The tracker (C7, see [`crate::tracker`]) wraps a
//! `PeerCore` in exactly the sense of the "tracker as a specialized peer"
//! design note: it owns one, extends its handler table, and falls back to
//! these routines for every kind it does not override.

use crate::config::NodeConfig;
use crate::error::{DfsResult, NodeError};
use crate::fsstore::FileStore;
use crate::net::acceptor::Dispatcher;
use crate::net::connection::ConnectionTable;
use crate::protocol::{FileModel, Message, PeerInfo, PeerState};
use crate::store::{models::FileRecord, MetadataStore, UpsertFileInput};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct PeerCore {
    pub config: NodeConfig,
    pub store: MetadataStore,
    pub fs: FileStore,
    pub connections: ConnectionTable,
    online: AtomicBool,
}

impl PeerCore {
    pub fn new(config: NodeConfig, store: MetadataStore) -> Self {
        let fs = FileStore::new(config.storage_root.clone());
        Self {
            config,
            store,
            fs,
            connections: ConnectionTable::new(),
            online: AtomicBool::new(false),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn tracker_host_port(&self) -> DfsResult<(String, u16)> {
        let addr = self.config.tracker_addr.ok_or(NodeError::MissingConfiguration {
            field: "tracker_addr".to_string(),
        })?;
        Ok((addr.ip().to_string(), addr.port()))
    }

    async fn send_to_tracker(&self, msg: Message) -> DfsResult<Message> {
        let (host, port) = self.tracker_host_port()?;
        self.connections
            .request(
                &host,
                port,
                &msg,
                self.config.connect_timeout,
                self.config.max_frame_len,
            )
            .await
    }

    /// Tell the tracker this node now holds `file`, if there is a tracker
    /// to tell. A `PeerCore` acting as the tracker itself has no
    /// `tracker_addr` — it is the authority, not a reporter — so this is a
    /// no-op rather than a propagated `MissingConfiguration` error; the
    /// blob has already been written successfully either way.
    async fn notify_tracker_file_changed(&self, file: FileModel, start_offset: u64) {
        if self.config.tracker_addr.is_none() {
            return;
        }
        if let Err(e) = self
            .send_to_tracker(Message::FileChanged {
                file,
                port: self.config.advertised_port,
                start_offset,
            })
            .await
        {
            warn!(error = %e, "failed to notify tracker of file change");
        }
    }

    async fn fetch_peer_list(&self, file_path: Option<String>) -> DfsResult<Vec<PeerInfo>> {
        match self
            .send_to_tracker(Message::PeerListRequest { file_path })
            .await?
        {
            Message::PeerList { peers } => Ok(peers),
            _ => Err(NodeError::Internal(
                "tracker replied to PEER_LIST_REQUEST with an unexpected message".to_string(),
            )),
        }
    }

    // ---- Client-facing operations (§4.5) -----------------------------

    /// `CONNECT_REQUEST(password, port, capacity…)`; on success, rebuild
    /// the local Peers table and catch up on any file this peer is
    /// missing or holds at a stale checksum.
    pub async fn connect(&self) -> DfsResult<bool> {
        let capacity = self.config.capacity;
        let reply = self
            .send_to_tracker(Message::ConnectRequest {
                password: self.config.password.clone(),
                port: self.config.advertised_port,
                max_file_size: capacity.max_file_size,
                max_file_sys_size: capacity.max_file_sys_size,
                curr_file_sys_size: capacity.curr_file_sys_size,
            })
            .await?;

        let successful = match reply {
            Message::ConnectResponse { successful } => successful,
            _ => {
                return Err(NodeError::Internal(
                    "tracker replied to CONNECT_REQUEST with an unexpected message".to_string(),
                ))
            }
        };
        if !successful {
            return Ok(false);
        }

        self.online.store(true, Ordering::Relaxed);
        info!("connected to tracker");

        for peer in self.fetch_peer_list(None).await? {
            self.store
                .upsert_peer(&peer.host, peer.port, peer.state, None)
                .await?;
        }

        for remote in self.ls(None).await? {
            match self.store.get_file(&remote.path).await? {
                None => {
                    self.store
                        .upsert_file(UpsertFileInput {
                            path: remote.path.clone(),
                            is_dir: remote.is_dir,
                            checksum: remote.checksum.clone(),
                            size: remote.size,
                            latest_version: Some(remote.latest_version),
                        })
                        .await?;
                }
                Some(local)
                    if local.latest_version == remote.latest_version
                        && local.golden_checksum != remote.checksum =>
                {
                    self.download_file(&remote.path, None).await?;
                }
                _ => {}
            }
        }

        Ok(true)
    }

    /// `DISCONNECT_REQUEST`; if the tracker reports unreplicated files,
    /// keep polling until cleared, then stop accepting.
    pub async fn disconnect(&self, check_for_unreplicated: bool) -> DfsResult<()> {
        loop {
            let reply = self
                .send_to_tracker(Message::DisconnectRequest {
                    check_for_unreplicated,
                    port: self.config.advertised_port,
                })
                .await?;
            match reply {
                Message::DisconnectResponse { should_wait } => {
                    if !should_wait {
                        self.online.store(false, Ordering::Relaxed);
                        return Ok(());
                    }
                    debug!("tracker reports unreplicated files, waiting before retry");
                    tokio::time::sleep(self.config.acceptor_poll_interval).await;
                }
                _ => {
                    return Err(NodeError::Internal(
                        "tracker replied to DISCONNECT_REQUEST with an unexpected message"
                            .to_string(),
                    ))
                }
            }
        }
    }

    /// Write `data` at `offset`, recompute the checksum over the whole
    /// file, and notify the tracker: `NEW_FILE_AVAILABLE` the first time
    /// this path is seen locally, `FILE_CHANGED` thereafter.
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> DfsResult<()> {
        let existing = self.store.get_file(path).await?;
        let version = existing.as_ref().map(|f| f.latest_version).unwrap_or(1);
        let is_new = existing.is_none();

        let (_, checksum, size) = self.fs.write(path, version, data, offset)?;
        let record = self
            .store
            .upsert_file(UpsertFileInput {
                path: path.to_string(),
                is_dir: false,
                checksum: checksum.clone(),
                size,
                latest_version: Some(version),
            })
            .await?;
        self.store.add_local_file(path).await?;

        let model = FileModel {
            path: path.to_string(),
            is_dir: false,
            size,
            checksum,
            latest_version: record.latest_version,
            data: None,
        };

        if is_new {
            self.send_to_tracker(Message::NewFileAvailable {
                file: model,
                port: self.config.advertised_port,
            })
            .await?;
        } else {
            self.send_to_tracker(Message::FileChanged {
                file: model,
                port: self.config.advertised_port,
                start_offset: offset,
            })
            .await?;
        }
        Ok(())
    }

    /// Local read, falling back to [`Self::download_file`] and retrying
    /// once on a miss.
    pub async fn read(&self, path: &str, offset: Option<u64>, length: i64) -> DfsResult<Vec<u8>> {
        let version = self
            .store
            .get_file(path)
            .await?
            .map(|f| f.latest_version)
            .unwrap_or(1);

        if let Some(data) = self.fs.read_range(path, version, offset.unwrap_or(0), length)? {
            return Ok(data);
        }

        self.download_file(path, None).await?;

        let version = self
            .store
            .get_file(path)
            .await?
            .ok_or_else(|| NodeError::FileNotFound {
                path: path.to_string(),
            })?
            .latest_version;
        self.fs
            .read_range(path, version, offset.unwrap_or(0), length)?
            .ok_or_else(|| NodeError::FileNotFound {
                path: path.to_string(),
            })
    }

    /// Idempotent and self-correcting (law 5): a no-op if the local copy
    /// already matches the golden checksum; otherwise walks the peer list
    /// up to `download_max_attempts` rounds.
    pub async fn download_file(
        &self,
        path: &str,
        peer_list: Option<Vec<PeerInfo>>,
    ) -> DfsResult<()> {
        let target = self
            .store
            .get_file(path)
            .await?
            .ok_or_else(|| NodeError::FileNotFound {
                path: path.to_string(),
            })?;

        if let Some(local) = self.fs.read(path, target.latest_version)? {
            if FileStore::checksum(&local) == target.golden_checksum {
                return Ok(());
            }
        }

        for attempt in 1..=self.config.download_max_attempts {
            let peers = match &peer_list {
                Some(p) => p.clone(),
                None => self.fetch_peer_list(Some(path.to_string())).await?,
            };

            let mut found: Option<FileModel> = None;
            for peer in &peers {
                let reply = self
                    .connections
                    .request(
                        &peer.host,
                        peer.port,
                        &Message::FileDownloadRequest {
                            file_path: path.to_string(),
                        },
                        self.config.connect_timeout,
                        self.config.max_frame_len,
                    )
                    .await;
                match reply {
                    Ok(Message::FileData { file }) => {
                        found = Some(file);
                        break;
                    }
                    Ok(Message::FileDownloadDecline { .. }) => continue,
                    _ => continue,
                }
            }

            let Some(file) = found else {
                debug!(path, attempt, "no peer held the file this round");
                continue;
            };
            let data = file.data.clone().unwrap_or_default();
            self.fs.replace(path, file.latest_version, &data)?;
            let checksum = FileStore::checksum(&data);

            if checksum == target.golden_checksum {
                self.store
                    .upsert_file(UpsertFileInput {
                        path: path.to_string(),
                        is_dir: false,
                        checksum: checksum.clone(),
                        size: data.len() as u64,
                        latest_version: Some(file.latest_version),
                    })
                    .await?;
                self.store.add_local_file(path).await?;
                self.notify_tracker_file_changed(
                    FileModel {
                        path: path.to_string(),
                        is_dir: false,
                        size: data.len() as u64,
                        checksum,
                        latest_version: file.latest_version,
                        data: None,
                    },
                    0,
                )
                .await;
                return Ok(());
            }
            warn!(path, attempt, "downloaded content failed checksum verification");
        }

        Err(NodeError::ChecksumMismatch {
            path: path.to_string(),
            attempts: self.config.download_max_attempts,
        })
    }

    /// `DELETE_REQUEST`; on approval, remove the local blob and fan out
    /// `DELETE` to every peer the tracker lists as holding the file.
    pub async fn delete(&self, path: &str) -> DfsResult<bool> {
        let can_delete = match self
            .send_to_tracker(Message::DeleteRequest {
                file_path: path.to_string(),
            })
            .await?
        {
            Message::DeleteResponse { can_delete, .. } => can_delete,
            _ => {
                return Err(NodeError::Internal(
                    "tracker replied to DELETE_REQUEST with an unexpected message".to_string(),
                ))
            }
        };
        if !can_delete {
            return Ok(false);
        }

        let version = self
            .store
            .get_file(path)
            .await?
            .map(|f| f.latest_version)
            .unwrap_or(1);
        self.fs.delete(path, version)?;

        if let Ok(peers) = self.fetch_peer_list(Some(path.to_string())).await {
            for peer in peers {
                let _ = self
                    .connections
                    .request(
                        &peer.host,
                        peer.port,
                        &Message::Delete {
                            file_path: path.to_string(),
                        },
                        self.config.connect_timeout,
                        self.config.max_frame_len,
                    )
                    .await;
            }
        }
        Ok(true)
    }

    /// `MOVE_REQUEST`; on validation, rename locally and fan out `MOVE`.
    pub async fn mv(&self, src: &str, dst: &str) -> DfsResult<bool> {
        let valid = match self
            .send_to_tracker(Message::MoveRequest {
                source_path: src.to_string(),
                dest_path: dst.to_string(),
            })
            .await?
        {
            Message::MoveResponse { valid } => valid,
            _ => {
                return Err(NodeError::Internal(
                    "tracker replied to MOVE_REQUEST with an unexpected message".to_string(),
                ))
            }
        };
        if !valid {
            return Ok(false);
        }

        let version = self
            .store
            .get_file(src)
            .await?
            .map(|f| f.latest_version)
            .unwrap_or(1);
        self.fs.move_file(src, dst, version)?;

        if let Ok(peers) = self.fetch_peer_list(Some(dst.to_string())).await {
            for peer in peers {
                let _ = self
                    .connections
                    .request(
                        &peer.host,
                        peer.port,
                        &Message::Move {
                            source_path: src.to_string(),
                            dest_path: dst.to_string(),
                        },
                        self.config.connect_timeout,
                        self.config.max_frame_len,
                    )
                    .await;
            }
        }
        Ok(true)
    }

    /// `LIST_REQUEST`; returns the tracker's full file list.
    pub async fn ls(&self, dir_path: Option<String>) -> DfsResult<Vec<FileModel>> {
        match self.send_to_tracker(Message::ListRequest { dir_path }).await? {
            Message::List { file_list } => Ok(file_list),
            _ => Err(NodeError::Internal(
                "tracker replied to LIST_REQUEST with an unexpected message".to_string(),
            )),
        }
    }

    /// `ARCHIVE_REQUEST`; on success, the tracker does not echo the new
    /// version number, so the caller increments its own local record and
    /// duplicates the blob, mirroring the source's behavior exactly.
    pub async fn archive(&self, path: &str) -> DfsResult<bool> {
        let archived = match self
            .send_to_tracker(Message::ArchiveRequest {
                file_path: path.to_string(),
            })
            .await?
        {
            Message::ArchiveResponse { archived, .. } => archived,
            _ => {
                return Err(NodeError::Internal(
                    "tracker replied to ARCHIVE_REQUEST with an unexpected message".to_string(),
                ))
            }
        };
        if archived {
            if let Some(local) = self.store.get_file(path).await? {
                let new_version = local.latest_version + 1;
                self.store
                    .upsert_file(UpsertFileInput {
                        path: path.to_string(),
                        is_dir: local.is_dir,
                        checksum: local.golden_checksum.clone(),
                        size: local.size,
                        latest_version: Some(new_version),
                    })
                    .await?;
                self.fs.copy_version(path, local.latest_version, new_version)?;
            }
        }
        Ok(archived)
    }

    // ---- Inbound handlers on a peer (§4.5) ---------------------------

    async fn handle_connect_request_gossip(&self, msg: Message, peer_addr: SocketAddr) -> Message {
        if let Message::ConnectRequest { port, .. } = msg {
            let _ = self
                .store
                .upsert_peer(&peer_addr.ip().to_string(), port, PeerState::Online, None)
                .await;
        }
        Message::ConnectResponse { successful: true }
    }

    async fn handle_disconnect_request_gossip(
        &self,
        msg: Message,
        peer_addr: SocketAddr,
    ) -> Message {
        if let Message::DisconnectRequest { port, .. } = msg {
            let _ = self
                .store
                .update_peer_state(&peer_addr.ip().to_string(), port, PeerState::Offline)
                .await;
        }
        Message::DisconnectResponse { should_wait: false }
    }

    async fn handle_file_download_request(&self, file_path: String) -> Message {
        let version = self
            .store
            .get_file(&file_path)
            .await
            .ok()
            .flatten()
            .map(|f| f.latest_version)
            .unwrap_or(1);

        match self.fs.read(&file_path, version) {
            Ok(Some(data)) => {
                let checksum = FileStore::checksum(&data);
                Message::FileData {
                    file: FileModel {
                        path: file_path,
                        is_dir: false,
                        size: data.len() as u64,
                        checksum,
                        latest_version: version,
                        data: Some(data),
                    },
                }
            }
            _ => Message::FileDownloadDecline { file_path },
        }
    }

    /// `FILE_CHANGED` inbound from the tracker after another peer wrote.
    /// One-way: no reply is sent back on this socket.
    async fn handle_file_changed(&self, file: FileModel, start_offset: u64) {
        let local = self.store.get_file(&file.path).await.ok().flatten();
        if let Some(local) = &local {
            if local.golden_checksum == file.checksum {
                return;
            }
        }

        let data = file.data.clone().unwrap_or_default();
        let (_, checksum, size) = match self.fs.write(&file.path, file.latest_version, &data, start_offset) {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %file.path, error = %e, "failed writing FILE_CHANGED payload");
                return;
            }
        };

        if checksum == file.checksum {
            let _ = self
                .store
                .upsert_file(UpsertFileInput {
                    path: file.path.clone(),
                    is_dir: false,
                    checksum,
                    size,
                    latest_version: Some(file.latest_version),
                })
                .await;
            let _ = self.store.add_local_file(&file.path).await;
            self.notify_tracker_file_changed(
                FileModel {
                    path: file.path.clone(),
                    is_dir: false,
                    size,
                    checksum: file.checksum.clone(),
                    latest_version: file.latest_version,
                    data: None,
                },
                0,
            )
            .await;
        } else {
            // Still mismatched: fall back to a full re-fetch instead of a
            // partial write.
            let _ = self.download_file(&file.path, None).await;
        }
    }

    /// `NEW_FILE_AVAILABLE` inbound: treat as an instruction to replicate.
    async fn handle_new_file_available(&self, file: FileModel) {
        if self.store.get_file(&file.path).await.ok().flatten().is_none() {
            let _ = self
                .store
                .upsert_file(UpsertFileInput {
                    path: file.path.clone(),
                    is_dir: file.is_dir,
                    checksum: file.checksum.clone(),
                    size: file.size,
                    latest_version: Some(file.latest_version),
                })
                .await;
        }
        if let Err(e) = self.download_file(&file.path, None).await {
            warn!(path = %file.path, error = %e, "failed to replicate newly available file");
        }
    }

    /// `FILE_ARCHIVED(path, new_version)`: duplicate forward if currently
    /// held at an older version.
    async fn handle_file_archived(&self, file_path: String, new_version: u32) {
        if let Ok(Some(local)) = self.store.get_file(&file_path).await {
            if local.latest_version < new_version {
                let _ = self.fs.copy_version(&file_path, local.latest_version, new_version);
                let _ = self
                    .store
                    .upsert_file(UpsertFileInput {
                        path: file_path,
                        is_dir: local.is_dir,
                        checksum: local.golden_checksum,
                        size: local.size,
                        latest_version: Some(new_version),
                    })
                    .await;
            }
        }
    }

    async fn handle_delete(&self, file_path: String) {
        let version = self
            .store
            .get_file(&file_path)
            .await
            .ok()
            .flatten()
            .map(|f| f.latest_version)
            .unwrap_or(1);
        let _ = self.fs.delete(&file_path, version);
    }

    async fn handle_move(&self, source_path: String, dest_path: String) {
        let version = self
            .store
            .get_file(&source_path)
            .await
            .ok()
            .flatten()
            .map(|f| f.latest_version)
            .unwrap_or(1);
        let _ = self.fs.move_file(&source_path, &dest_path, version);
    }

    async fn handle_list_request(&self) -> Message {
        let files: Vec<FileRecord> = self.store.list_files().await.unwrap_or_default();
        Message::List {
            file_list: files
                .into_iter()
                .map(|f| FileModel {
                    path: f.path,
                    is_dir: f.is_dir,
                    size: f.size,
                    checksum: f.golden_checksum,
                    latest_version: f.latest_version,
                    data: None,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Dispatcher for PeerCore {
    async fn dispatch(&self, msg: Message, peer_addr: SocketAddr) -> Option<Message> {
        match msg {
            Message::ConnectRequest { .. } => {
                Some(self.handle_connect_request_gossip(msg, peer_addr).await)
            }
            Message::DisconnectRequest { .. } => {
                Some(self.handle_disconnect_request_gossip(msg, peer_addr).await)
            }
            Message::FileDownloadRequest { file_path } => {
                Some(self.handle_file_download_request(file_path).await)
            }
            Message::FileChanged { file, start_offset, .. } => {
                self.handle_file_changed(file, start_offset).await;
                None
            }
            Message::NewFileAvailable { file, .. } => {
                self.handle_new_file_available(file).await;
                None
            }
            Message::FileArchived { file_path, new_version } => {
                self.handle_file_archived(file_path, new_version).await;
                None
            }
            Message::Delete { file_path } => {
                self.handle_delete(file_path).await;
                None
            }
            Message::Move { source_path, dest_path } => {
                self.handle_move(source_path, dest_path).await;
                None
            }
            Message::ListRequest { .. } => Some(self.handle_list_request().await),
            other => {
                debug!(kind = other.kind_name(), peer = %peer_addr, "no peer handler for this message kind");
                None
            }
        }
    }
}
