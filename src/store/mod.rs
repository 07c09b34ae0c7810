//! Metadata store (C3): single-writer discipline over an embedded SQLite
//! file. Every operation — read or write — is enqueued on an unbounded
//! channel and executed in submission order by one dedicated thread that
//! owns the `rusqlite::Connection`. Routing reads through the same worker
//! gives the same happens-before ordering as the source's
//! `queue.drain()`-before-read pattern without needing a second lock
//! discipline (see the serialized-metadata-writer design note).

pub mod models;
mod schema;

use crate::config::{Capacity, NodeRole};
use crate::error::{DfsResult, NodeError};
use crate::protocol::PeerState;
use models::{state_from_str, state_to_str, FileRecord, PeerRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::oneshot;

/// Input to `upsert_file`. `latest_version` is `None` on first write (the
/// store assigns version 1); `Some(n)` to set an explicit version, used by
/// the tracker's archive bump and by peers replaying a tracker-confirmed
/// state.
#[derive(Debug, Clone)]
pub struct UpsertFileInput {
    pub path: String,
    pub is_dir: bool,
    pub checksum: Vec<u8>,
    pub size: u64,
    pub latest_version: Option<u32>,
}

enum StoreCommand {
    UpsertFile {
        file: UpsertFileInput,
        reply: oneshot::Sender<DfsResult<FileRecord>>,
    },
    GetFile {
        path: String,
        reply: oneshot::Sender<DfsResult<Option<FileRecord>>>,
    },
    ListFiles {
        reply: oneshot::Sender<DfsResult<Vec<FileRecord>>>,
    },
    ArchiveFile {
        path: String,
        reply: oneshot::Sender<DfsResult<Option<u32>>>,
    },

    UpsertPeer {
        host: String,
        port: u16,
        state: PeerState,
        capacity: Option<Capacity>,
        reply: oneshot::Sender<DfsResult<PeerRecord>>,
    },
    GetPeerState {
        host: String,
        port: u16,
        reply: oneshot::Sender<DfsResult<Option<PeerState>>>,
    },
    UpdatePeerState {
        host: String,
        port: u16,
        state: PeerState,
        reply: oneshot::Sender<DfsResult<()>>,
    },
    ListPeers {
        reply: oneshot::Sender<DfsResult<Vec<PeerRecord>>>,
    },

    GetPeersForFile {
        path: String,
        reply: oneshot::Sender<DfsResult<Vec<PeerRecord>>>,
    },
    GetReplicationCandidates {
        path: String,
        exclude_host: String,
        exclude_port: u16,
        level: usize,
        reply: oneshot::Sender<DfsResult<Vec<PeerRecord>>>,
    },
    HasUnreplicatedFiles {
        host: String,
        port: u16,
        reply: oneshot::Sender<DfsResult<bool>>,
    },
    AddFilePeerEntry {
        path: String,
        host: String,
        port: u16,
        checksum: Vec<u8>,
        reply: oneshot::Sender<DfsResult<()>>,
    },

    AddLocalFile {
        path: String,
        reply: oneshot::Sender<DfsResult<()>>,
    },
    FileExistsLocally {
        path: String,
        reply: oneshot::Sender<DfsResult<bool>>,
    },

    RenameFile {
        old_path: String,
        new_path: String,
        reply: oneshot::Sender<DfsResult<bool>>,
    },
    DeleteFile {
        path: String,
        reply: oneshot::Sender<DfsResult<bool>>,
    },
}

/// Handle to the metadata store. Cheap to clone; every clone shares the
/// same underlying writer thread.
#[derive(Clone)]
pub struct MetadataStore {
    tx: std_mpsc::Sender<StoreCommand>,
}

impl MetadataStore {
    /// Open (or create) the database file at `db_path` and spawn its
    /// writer thread. Schema bootstrap failure is fatal.
    pub fn open(db_path: PathBuf, role: NodeRole) -> DfsResult<Self> {
        let conn = Connection::open(&db_path)?;
        schema::bootstrap(&conn, role)?;

        let (tx, rx) = std_mpsc::channel::<StoreCommand>();
        thread::Builder::new()
            .name("metadata-writer".to_string())
            .spawn(move || run_writer(conn, rx))
            .map_err(|e| NodeError::Store(format!("failed to spawn metadata writer: {e}")))?;

        Ok(Self { tx })
    }

    /// In-memory store for tests: no file ever touches disk.
    pub fn open_in_memory(role: NodeRole) -> DfsResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::bootstrap(&conn, role)?;
        let (tx, rx) = std_mpsc::channel::<StoreCommand>();
        thread::Builder::new()
            .name("metadata-writer".to_string())
            .spawn(move || run_writer(conn, rx))
            .map_err(|e| NodeError::Store(format!("failed to spawn metadata writer: {e}")))?;
        Ok(Self { tx })
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<DfsResult<T>>) -> StoreCommand,
    ) -> DfsResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| NodeError::Store("metadata writer thread is gone".to_string()))?;
        rx.await
            .map_err(|_| NodeError::Store("metadata writer dropped the reply".to_string()))?
    }

    pub async fn upsert_file(&self, file: UpsertFileInput) -> DfsResult<FileRecord> {
        self.call(|reply| StoreCommand::UpsertFile { file, reply })
            .await
    }

    pub async fn get_file(&self, path: &str) -> DfsResult<Option<FileRecord>> {
        self.call(|reply| StoreCommand::GetFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn list_files(&self) -> DfsResult<Vec<FileRecord>> {
        self.call(|reply| StoreCommand::ListFiles { reply }).await
    }

    /// Bump `latest_version` by one, freezing the prior version's bytes in
    /// place. Returns the new version number, or `None` if the file does
    /// not exist.
    pub async fn archive_file(&self, path: &str) -> DfsResult<Option<u32>> {
        self.call(|reply| StoreCommand::ArchiveFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn upsert_peer(
        &self,
        host: &str,
        port: u16,
        state: PeerState,
        capacity: Option<Capacity>,
    ) -> DfsResult<PeerRecord> {
        self.call(|reply| StoreCommand::UpsertPeer {
            host: host.to_string(),
            port,
            state,
            capacity,
            reply,
        })
        .await
    }

    pub async fn get_peer_state(&self, host: &str, port: u16) -> DfsResult<Option<PeerState>> {
        self.call(|reply| StoreCommand::GetPeerState {
            host: host.to_string(),
            port,
            reply,
        })
        .await
    }

    pub async fn update_peer_state(
        &self,
        host: &str,
        port: u16,
        state: PeerState,
    ) -> DfsResult<()> {
        self.call(|reply| StoreCommand::UpdatePeerState {
            host: host.to_string(),
            port,
            state,
            reply,
        })
        .await
    }

    pub async fn list_peers(&self) -> DfsResult<Vec<PeerRecord>> {
        self.call(|reply| StoreCommand::ListPeers { reply }).await
    }

    pub async fn get_peers_for_file(&self, path: &str) -> DfsResult<Vec<PeerRecord>> {
        self.call(|reply| StoreCommand::GetPeersForFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_replication_candidates(
        &self,
        path: &str,
        exclude_host: &str,
        exclude_port: u16,
        level: usize,
    ) -> DfsResult<Vec<PeerRecord>> {
        self.call(|reply| StoreCommand::GetReplicationCandidates {
            path: path.to_string(),
            exclude_host: exclude_host.to_string(),
            exclude_port,
            level,
            reply,
        })
        .await
    }

    pub async fn has_unreplicated_files(&self, host: &str, port: u16) -> DfsResult<bool> {
        self.call(|reply| StoreCommand::HasUnreplicatedFiles {
            host: host.to_string(),
            port,
            reply,
        })
        .await
    }

    pub async fn add_file_peer_entry(
        &self,
        path: &str,
        host: &str,
        port: u16,
        checksum: Vec<u8>,
    ) -> DfsResult<()> {
        self.call(|reply| StoreCommand::AddFilePeerEntry {
            path: path.to_string(),
            host: host.to_string(),
            port,
            checksum,
            reply,
        })
        .await
    }

    pub async fn add_local_file(&self, path: &str) -> DfsResult<()> {
        self.call(|reply| StoreCommand::AddLocalFile {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn file_exists_locally(&self, path: &str) -> DfsResult<bool> {
        self.call(|reply| StoreCommand::FileExistsLocally {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Renames a file's authoritative record in place. Returns `false` if
    /// `old_path` has no record.
    pub async fn rename_file(&self, old_path: &str, new_path: &str) -> DfsResult<bool> {
        self.call(|reply| StoreCommand::RenameFile {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
            reply,
        })
        .await
    }

    /// Removes a file's record and its version history. Returns `false` if
    /// it had no record.
    pub async fn delete_file(&self, path: &str) -> DfsResult<bool> {
        self.call(|reply| StoreCommand::DeleteFile {
            path: path.to_string(),
            reply,
        })
        .await
    }
}

fn run_writer(conn: Connection, rx: std_mpsc::Receiver<StoreCommand>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            StoreCommand::UpsertFile { file, reply } => {
                let _ = reply.send(upsert_file(&conn, file));
            }
            StoreCommand::GetFile { path, reply } => {
                let _ = reply.send(get_file(&conn, &path));
            }
            StoreCommand::ListFiles { reply } => {
                let _ = reply.send(list_files(&conn));
            }
            StoreCommand::ArchiveFile { path, reply } => {
                let _ = reply.send(archive_file(&conn, &path));
            }
            StoreCommand::UpsertPeer {
                host,
                port,
                state,
                capacity,
                reply,
            } => {
                let _ = reply.send(upsert_peer(&conn, &host, port, state, capacity));
            }
            StoreCommand::GetPeerState { host, port, reply } => {
                let _ = reply.send(get_peer_state(&conn, &host, port));
            }
            StoreCommand::UpdatePeerState {
                host,
                port,
                state,
                reply,
            } => {
                let _ = reply.send(update_peer_state(&conn, &host, port, state));
            }
            StoreCommand::ListPeers { reply } => {
                let _ = reply.send(list_peers(&conn));
            }
            StoreCommand::GetPeersForFile { path, reply } => {
                let _ = reply.send(get_peers_for_file(&conn, &path));
            }
            StoreCommand::GetReplicationCandidates {
                path,
                exclude_host,
                exclude_port,
                level,
                reply,
            } => {
                let _ = reply.send(get_replication_candidates(
                    &conn,
                    &path,
                    &exclude_host,
                    exclude_port,
                    level,
                ));
            }
            StoreCommand::HasUnreplicatedFiles { host, port, reply } => {
                let _ = reply.send(has_unreplicated_files(&conn, &host, port));
            }
            StoreCommand::AddFilePeerEntry {
                path,
                host,
                port,
                checksum,
                reply,
            } => {
                let _ = reply.send(add_file_peer_entry(&conn, &path, &host, port, checksum));
            }
            StoreCommand::AddLocalFile { path, reply } => {
                let _ = reply.send(add_local_file(&conn, &path));
            }
            StoreCommand::FileExistsLocally { path, reply } => {
                let _ = reply.send(file_exists_locally(&conn, &path));
            }
            StoreCommand::RenameFile { old_path, new_path, reply } => {
                let _ = reply.send(rename_file(&conn, &old_path, &new_path));
            }
            StoreCommand::DeleteFile { path, reply } => {
                let _ = reply.send(delete_file(&conn, &path));
            }
        }
    }
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        is_dir: row.get::<_, i64>(2)? != 0,
        golden_checksum: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        latest_version: row.get::<_, i64>(5)? as u32,
        parent_id: row.get(6)?,
    })
}

const FILE_COLUMNS: &str =
    "id, path, is_directory, golden_checksum, size, latest_version, parent_id";

fn upsert_file(conn: &Connection, file: UpsertFileInput) -> DfsResult<FileRecord> {
    let existing = get_file(conn, &file.path)?;
    let version = file
        .latest_version
        .or_else(|| existing.as_ref().map(|f| f.latest_version))
        .unwrap_or(1);

    conn.execute(
        "INSERT INTO files (path, is_directory, golden_checksum, size, latest_version)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path) DO UPDATE SET
            golden_checksum = excluded.golden_checksum,
            size = excluded.size,
            latest_version = excluded.latest_version",
        params![file.path, file.is_dir as i64, file.checksum, file.size as i64, version],
    )?;

    let record = get_file(conn, &file.path)?
        .ok_or_else(|| NodeError::Store("file vanished after upsert".to_string()))?;

    conn.execute(
        "INSERT INTO versions (file_id, version_number, version_name, size, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(file_id, version_number) DO UPDATE SET
            size = excluded.size,
            checksum = excluded.checksum",
        params![
            record.id,
            record.latest_version,
            record.path,
            record.size as i64,
            record.golden_checksum
        ],
    )?;

    Ok(record)
}

fn get_file(conn: &Connection, path: &str) -> DfsResult<Option<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE path = ?1");
    Ok(conn
        .query_row(&sql, params![path], row_to_file)
        .optional()?)
}

fn list_files(conn: &Connection) -> DfsResult<Vec<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_file)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Bump `latest_version`, freeze the old version's row, and seed a new
/// version row with the same bytes (archive duplicates the blob; no
/// content changes until the next write).
fn archive_file(conn: &Connection, path: &str) -> DfsResult<Option<u32>> {
    let Some(file) = get_file(conn, path)? else {
        return Ok(None);
    };
    let new_version = file.latest_version + 1;

    conn.execute(
        "UPDATE files SET latest_version = ?1 WHERE id = ?2",
        params![new_version, file.id],
    )?;
    conn.execute(
        "INSERT INTO versions (file_id, version_number, version_name, size, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            file.id,
            new_version,
            file.path,
            file.size as i64,
            file.golden_checksum
        ],
    )?;
    Ok(Some(new_version))
}

fn row_to_peer(row: &rusqlite::Row, with_capacity: bool) -> rusqlite::Result<PeerRecord> {
    let capacity = if with_capacity {
        Some(Capacity {
            max_file_size: row.get::<_, i64>("max_file_size")? as u64,
            max_file_sys_size: row.get::<_, i64>("max_file_sys_size")? as u64,
            curr_file_sys_size: row.get::<_, i64>("curr_file_sys_size")? as u64,
        })
    } else {
        None
    };
    Ok(PeerRecord {
        id: row.get("id")?,
        host: row.get("host")?,
        port: row.get::<_, i64>("port")? as u16,
        display_name: row.get("name")?,
        state: state_from_str(&row.get::<_, String>("state")?),
        capacity,
    })
}

fn has_capacity_columns(conn: &Connection) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(peers)")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(names.iter().any(|n| n == "max_file_size"))
}

fn upsert_peer(
    conn: &Connection,
    host: &str,
    port: u16,
    state: PeerState,
    capacity: Option<Capacity>,
) -> DfsResult<PeerRecord> {
    let with_capacity = has_capacity_columns(conn)?;
    if with_capacity {
        let cap = capacity.unwrap_or_default();
        conn.execute(
            "INSERT INTO peers (host, port, state, max_file_size, max_file_sys_size, curr_file_sys_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(host, port) DO UPDATE SET
                state = excluded.state,
                max_file_size = excluded.max_file_size,
                max_file_sys_size = excluded.max_file_sys_size,
                curr_file_sys_size = excluded.curr_file_sys_size",
            params![
                host,
                port,
                state_to_str(state),
                cap.max_file_size as i64,
                cap.max_file_sys_size as i64,
                cap.curr_file_sys_size as i64
            ],
        )?;
    } else {
        conn.execute(
            "INSERT INTO peers (host, port, state) VALUES (?1, ?2, ?3)
             ON CONFLICT(host, port) DO UPDATE SET state = excluded.state",
            params![host, port, state_to_str(state)],
        )?;
    }

    let sql = "SELECT * FROM peers WHERE host = ?1 AND port = ?2";
    conn.query_row(sql, params![host, port], |row| row_to_peer(row, with_capacity))
        .optional()?
        .ok_or_else(|| NodeError::Store("peer vanished after upsert".to_string()))
}

fn get_peer_state(conn: &Connection, host: &str, port: u16) -> DfsResult<Option<PeerState>> {
    let state: Option<String> = conn
        .query_row(
            "SELECT state FROM peers WHERE host = ?1 AND port = ?2",
            params![host, port],
            |row| row.get(0),
        )
        .optional()?;
    Ok(state.map(|s| state_from_str(&s)))
}

fn update_peer_state(conn: &Connection, host: &str, port: u16, state: PeerState) -> DfsResult<()> {
    conn.execute(
        "UPDATE peers SET state = ?1 WHERE host = ?2 AND port = ?3",
        params![state_to_str(state), host, port],
    )?;
    Ok(())
}

fn list_peers(conn: &Connection) -> DfsResult<Vec<PeerRecord>> {
    let with_capacity = has_capacity_columns(conn)?;
    let mut stmt = conn.prepare("SELECT * FROM peers ORDER BY id")?;
    let rows = stmt.query_map([], |row| row_to_peer(row, with_capacity))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn get_peers_for_file(conn: &Connection, path: &str) -> DfsResult<Vec<PeerRecord>> {
    let with_capacity = has_capacity_columns(conn)?;
    let sql = "SELECT peers.* FROM peers
               JOIN peer_files ON peer_files.peer_id = peers.id
               JOIN files ON files.id = peer_files.file_id
               WHERE files.path = ?1
               ORDER BY peers.id";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![path], |row| row_to_peer(row, with_capacity))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Online peers other than `(exclude_host, exclude_port)`, capped at
/// `level`. Capacity accounting (subtracting file size from remaining
/// quota) is not performed here; see the replication-target design note.
fn get_replication_candidates(
    conn: &Connection,
    _path: &str,
    exclude_host: &str,
    exclude_port: u16,
    level: usize,
) -> DfsResult<Vec<PeerRecord>> {
    let with_capacity = has_capacity_columns(conn)?;
    let sql = "SELECT * FROM peers WHERE state = 'ONLINE' AND NOT (host = ?1 AND port = ?2)
               ORDER BY id";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![exclude_host, exclude_port], |row| {
        row_to_peer(row, with_capacity)
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
        if out.len() >= level {
            break;
        }
    }
    Ok(out)
}

fn has_unreplicated_files(conn: &Connection, host: &str, port: u16) -> DfsResult<bool> {
    let sql = "SELECT COUNT(*) FROM peer_files pf
               WHERE pf.peer_id = (SELECT id FROM peers WHERE host = ?1 AND port = ?2)
               AND (SELECT COUNT(*) FROM peer_files other WHERE other.file_id = pf.file_id) = 1";
    let count: i64 = conn.query_row(sql, params![host, port], |row| row.get(0))?;
    Ok(count > 0)
}

fn add_file_peer_entry(
    conn: &Connection,
    path: &str,
    host: &str,
    port: u16,
    checksum: Vec<u8>,
) -> DfsResult<()> {
    let file = get_file(conn, path)?.ok_or_else(|| NodeError::FileNotFound {
        path: path.to_string(),
    })?;
    let peer_id: i64 = conn.query_row(
        "SELECT id FROM peers WHERE host = ?1 AND port = ?2",
        params![host, port],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO peer_files (file_id, peer_id, checksum) VALUES (?1, ?2, ?3)
         ON CONFLICT(file_id, peer_id) DO UPDATE SET checksum = excluded.checksum",
        params![file.id, peer_id, checksum],
    )?;
    Ok(())
}

fn add_local_file(conn: &Connection, path: &str) -> DfsResult<()> {
    let file = get_file(conn, path)?.ok_or_else(|| NodeError::FileNotFound {
        path: path.to_string(),
    })?;
    conn.execute(
        "INSERT OR IGNORE INTO local_peer_files (file_id) VALUES (?1)",
        params![file.id],
    )?;
    Ok(())
}

fn file_exists_locally(conn: &Connection, path: &str) -> DfsResult<bool> {
    let Some(file) = get_file(conn, path)? else {
        return Ok(false);
    };
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM local_peer_files WHERE file_id = ?1",
        params![file.id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn rename_file(conn: &Connection, old_path: &str, new_path: &str) -> DfsResult<bool> {
    let updated = conn.execute(
        "UPDATE files SET path = ?1 WHERE path = ?2",
        params![new_path, old_path],
    )?;
    Ok(updated > 0)
}

/// Removes a file's record and its version history. `peer_files` only
/// exists on the tracker schema; the delete there is best-effort since a
/// peer-role database never has that table.
fn delete_file(conn: &Connection, path: &str) -> DfsResult<bool> {
    let Some(file) = get_file(conn, path)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM versions WHERE file_id = ?1", params![file.id])?;
    conn.execute(
        "DELETE FROM local_peer_files WHERE file_id = ?1",
        params![file.id],
    )?;
    let _ = conn.execute("DELETE FROM peer_files WHERE file_id = ?1", params![file.id]);
    conn.execute("DELETE FROM files WHERE id = ?1", params![file.id])?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(path: &str) -> UpsertFileInput {
        UpsertFileInput {
            path: path.to_string(),
            is_dir: false,
            checksum: vec![1, 2, 3],
            size: 5,
            latest_version: None,
        }
    }

    #[tokio::test]
    async fn upsert_file_is_idempotent_on_identical_input() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store.upsert_file(sample_file("a.txt")).await.unwrap();
        store.upsert_file(sample_file("a.txt")).await.unwrap();
        let files = store.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].latest_version, 1);
    }

    #[tokio::test]
    async fn archive_is_monotone_and_preserves_old_checksum() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store.upsert_file(sample_file("a.txt")).await.unwrap();
        let new_version = store.archive_file("a.txt").await.unwrap().unwrap();
        assert_eq!(new_version, 2);
        let file = store.get_file("a.txt").await.unwrap().unwrap();
        assert_eq!(file.latest_version, 2);
        assert_eq!(file.golden_checksum, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn archive_of_missing_file_returns_none() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        assert_eq!(store.archive_file("missing.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_peer_is_idempotent() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store
            .upsert_peer("127.0.0.1", 11111, PeerState::Online, None)
            .await
            .unwrap();
        store
            .upsert_peer("127.0.0.1", 11111, PeerState::Online, None)
            .await
            .unwrap();
        let peers = store.list_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[tokio::test]
    async fn has_unreplicated_files_detects_sole_holder() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store.upsert_file(sample_file("solo.txt")).await.unwrap();
        store
            .upsert_peer("127.0.0.1", 11111, PeerState::Online, None)
            .await
            .unwrap();
        store
            .add_file_peer_entry("solo.txt", "127.0.0.1", 11111, vec![1, 2, 3])
            .await
            .unwrap();
        assert!(store
            .has_unreplicated_files("127.0.0.1", 11111)
            .await
            .unwrap());

        store
            .upsert_peer("127.0.0.1", 22222, PeerState::Online, None)
            .await
            .unwrap();
        store
            .add_file_peer_entry("solo.txt", "127.0.0.1", 22222, vec![1, 2, 3])
            .await
            .unwrap();
        assert!(!store
            .has_unreplicated_files("127.0.0.1", 11111)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rename_file_moves_the_path_and_keeps_history() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store.upsert_file(sample_file("old.txt")).await.unwrap();
        assert!(store.rename_file("old.txt", "new.txt").await.unwrap());
        assert!(store.get_file("old.txt").await.unwrap().is_none());
        assert!(store.get_file("new.txt").await.unwrap().is_some());
        assert!(!store.rename_file("missing.txt", "x.txt").await.unwrap());
    }

    #[tokio::test]
    async fn delete_file_removes_record_and_versions() {
        let store = MetadataStore::open_in_memory(NodeRole::Tracker).unwrap();
        store.upsert_file(sample_file("a.txt")).await.unwrap();
        store.archive_file("a.txt").await.unwrap();
        assert!(store.delete_file("a.txt").await.unwrap());
        assert!(store.get_file("a.txt").await.unwrap().is_none());
        assert!(!store.delete_file("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn peer_role_database_has_no_capacity_columns() {
        let store = MetadataStore::open_in_memory(NodeRole::Peer).unwrap();
        let peer = store
            .upsert_peer("127.0.0.1", 11111, PeerState::Online, None)
            .await
            .unwrap();
        assert!(peer.capacity.is_none());
    }
}
