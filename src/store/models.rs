//! Row types returned by the metadata store.

use crate::config::Capacity;
use crate::protocol::PeerState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub is_dir: bool,
    pub golden_checksum: Vec<u8>,
    pub size: u64,
    pub latest_version: u32,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub file_id: i64,
    pub version_number: u32,
    pub version_name: String,
    pub size: u64,
    pub checksum: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub display_name: Option<String>,
    pub state: PeerState,
    pub capacity: Option<Capacity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFileRecord {
    pub file_id: i64,
    pub peer_id: i64,
    pub checksum: Vec<u8>,
    pub pending_update: bool,
}

pub(crate) fn state_to_str(state: PeerState) -> &'static str {
    match state {
        PeerState::Online => "ONLINE",
        PeerState::Offline => "OFFLINE",
    }
}

pub(crate) fn state_from_str(s: &str) -> PeerState {
    match s {
        "ONLINE" => PeerState::Online,
        _ => PeerState::Offline,
    }
}
