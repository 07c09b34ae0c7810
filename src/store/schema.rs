//! Schema bootstrap (C3). `CREATE TABLE IF NOT EXISTS` for every table in
//! the persisted state layout, scoped to the node's role: a peer process
//! never creates the tracker-only tables and vice versa.

use crate::config::NodeRole;

const COMMON_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        is_directory INTEGER NOT NULL DEFAULT 0,
        golden_checksum BLOB NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        latest_version INTEGER NOT NULL DEFAULT 1,
        parent_id INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id),
        version_number INTEGER NOT NULL,
        version_name TEXT NOT NULL,
        size INTEGER NOT NULL,
        checksum BLOB NOT NULL,
        UNIQUE(file_id, version_number)
    )",
    "CREATE TABLE IF NOT EXISTS local_peer_files (
        file_id INTEGER PRIMARY KEY REFERENCES files(id)
    )",
];

const TRACKER_ONLY_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS peers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        state TEXT NOT NULL,
        max_file_size INTEGER NOT NULL DEFAULT 0,
        max_file_sys_size INTEGER NOT NULL DEFAULT 0,
        curr_file_sys_size INTEGER NOT NULL DEFAULT 0,
        UNIQUE(host, port)
    )",
    "CREATE TABLE IF NOT EXISTS peer_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(id),
        peer_id INTEGER NOT NULL REFERENCES peers(id),
        checksum BLOB NOT NULL,
        pending_update INTEGER NOT NULL DEFAULT 0,
        UNIQUE(file_id, peer_id)
    )",
    "CREATE TABLE IF NOT EXISTS peer_excluded_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        peer_id INTEGER NOT NULL REFERENCES peers(id),
        file_id INTEGER REFERENCES files(id),
        file_name_pattern TEXT NOT NULL
    )",
];

const PEER_ONLY_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS peers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        state TEXT NOT NULL,
        UNIQUE(host, port)
    )",
    "CREATE TABLE IF NOT EXISTS local_peer_excluded_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER REFERENCES files(id),
        file_name_pattern TEXT NOT NULL
    )",
];

/// Run schema bootstrap for `role`. Failure here is fatal (see the failure
/// model in the metadata store design).
pub fn bootstrap(conn: &rusqlite::Connection, role: NodeRole) -> rusqlite::Result<()> {
    for ddl in COMMON_TABLES {
        conn.execute(ddl, [])?;
    }
    let role_tables = match role {
        NodeRole::Tracker => TRACKER_ONLY_TABLES,
        NodeRole::Peer => PEER_ONLY_TABLES,
    };
    for ddl in role_tables {
        conn.execute(ddl, [])?;
    }
    Ok(())
}
