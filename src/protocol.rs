//! Wire message types (C1).
//!
//! A [`Message`] is the self-describing, tagged-union payload framed by
//! [`crate::net::codec`]. The tag is the enum discriminant bincode already
//! writes; no separate `kind` byte is hand-rolled.

use serde::{Deserialize, Serialize};

/// A peer's view of a file, as carried on the wire. `data` is `None` for
/// metadata-only messages (tracker notifications, directory listings) and
/// `Some` only on `FILE_DATA` replies to an explicit download request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModel {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub checksum: Vec<u8>,
    pub latest_version: u32,
    pub data: Option<Vec<u8>>,
}

impl FileModel {
    /// Clear `data` before sending a tracker notification: only peers
    /// selected as replication targets receive content.
    pub fn without_data(&self) -> Self {
        let mut clone = self.clone();
        clone.data = None;
        clone
    }
}

/// Liveness state of a peer as tracked in the Peers table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Online,
    Offline,
}

/// A peer's identity and advertised attributes, as returned in PEER_LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub host: String,
    pub port: u16,
    pub display_name: Option<String>,
    pub state: PeerState,
}

/// Every message kind in the wire protocol (see SPEC_FULL.md §6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    ConnectRequest {
        password: String,
        port: u16,
        max_file_size: u64,
        max_file_sys_size: u64,
        curr_file_sys_size: u64,
    },
    ConnectResponse {
        successful: bool,
    },

    DisconnectRequest {
        check_for_unreplicated: bool,
        port: u16,
    },
    DisconnectResponse {
        should_wait: bool,
    },

    PeerListRequest {
        file_path: Option<String>,
    },
    PeerList {
        peers: Vec<PeerInfo>,
    },

    FileDownloadRequest {
        file_path: String,
    },
    FileDownloadDecline {
        file_path: String,
    },
    FileData {
        file: FileModel,
    },

    FileChanged {
        file: FileModel,
        port: u16,
        start_offset: u64,
    },
    NewFileAvailable {
        file: FileModel,
        port: u16,
    },
    FileArchived {
        file_path: String,
        new_version: u32,
    },

    ValidateChecksumRequest {
        file_path: String,
        checksum: Vec<u8>,
    },
    ValidateChecksumResponse {
        file_path: String,
        valid: bool,
    },

    DeleteRequest {
        file_path: String,
    },
    DeleteResponse {
        file_path: String,
        can_delete: bool,
    },
    Delete {
        file_path: String,
    },

    MoveRequest {
        source_path: String,
        dest_path: String,
    },
    MoveResponse {
        valid: bool,
    },
    Move {
        source_path: String,
        dest_path: String,
    },

    ListRequest {
        dir_path: Option<String>,
    },
    List {
        file_list: Vec<FileModel>,
    },

    ArchiveRequest {
        file_path: String,
    },
    ArchiveResponse {
        file_path: String,
        archived: bool,
    },
}

impl Message {
    /// Short, stable name for the message kind, used only for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::ConnectRequest { .. } => "CONNECT_REQUEST",
            Message::ConnectResponse { .. } => "CONNECT_RESPONSE",
            Message::DisconnectRequest { .. } => "DISCONNECT_REQUEST",
            Message::DisconnectResponse { .. } => "DISCONNECT_RESPONSE",
            Message::PeerListRequest { .. } => "PEER_LIST_REQUEST",
            Message::PeerList { .. } => "PEER_LIST",
            Message::FileDownloadRequest { .. } => "FILE_DOWNLOAD_REQUEST",
            Message::FileDownloadDecline { .. } => "FILE_DOWNLOAD_DECLINE",
            Message::FileData { .. } => "FILE_DATA",
            Message::FileChanged { .. } => "FILE_CHANGED",
            Message::NewFileAvailable { .. } => "NEW_FILE_AVAILABLE",
            Message::FileArchived { .. } => "FILE_ARCHIVED",
            Message::ValidateChecksumRequest { .. } => "VALIDATE_CHECKSUM_REQUEST",
            Message::ValidateChecksumResponse { .. } => "VALIDATE_CHECKSUM_RESPONSE",
            Message::DeleteRequest { .. } => "DELETE_REQUEST",
            Message::DeleteResponse { .. } => "DELETE_RESPONSE",
            Message::Delete { .. } => "DELETE",
            Message::MoveRequest { .. } => "MOVE_REQUEST",
            Message::MoveResponse { .. } => "MOVE_RESPONSE",
            Message::Move { .. } => "MOVE",
            Message::ListRequest { .. } => "LIST_REQUEST",
            Message::List { .. } => "LIST",
            Message::ArchiveRequest { .. } => "ARCHIVE_REQUEST",
            Message::ArchiveResponse { .. } => "ARCHIVE_RESPONSE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_data_clears_payload_but_not_checksum() {
        let file = FileModel {
            path: "a.txt".into(),
            is_dir: false,
            size: 5,
            checksum: vec![1, 2, 3],
            latest_version: 1,
            data: Some(b"hello".to_vec()),
        };
        let cleared = file.without_data();
        assert!(cleared.data.is_none());
        assert_eq!(cleared.checksum, vec![1, 2, 3]);
    }

    #[test]
    fn kind_name_is_stable_for_logging() {
        let msg = Message::ConnectResponse { successful: true };
        assert_eq!(msg.kind_name(), "CONNECT_RESPONSE");
    }
}
