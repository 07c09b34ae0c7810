//! Node configuration.
//!
//! A single [`NodeConfig`] is assembled once at startup (see `main.rs`) from
//! defaults, an optional config file, and command-line flags, then shared by
//! every component that needs it. Nothing below the CLI layer reads the
//! environment or the filesystem for configuration directly.

use crate::error::{DfsResult, NodeError};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Which role this process plays in the star topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Tracker,
    Peer,
}

/// Capacity hints a peer advertises to the tracker at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub max_file_size: u64,
    pub max_file_sys_size: u64,
    pub curr_file_sys_size: u64,
}

impl Default for Capacity {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024,
            max_file_sys_size: 64 * 1024 * 1024 * 1024,
            curr_file_sys_size: 0,
        }
    }
}

/// Fully resolved, immutable configuration for one node process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub role: NodeRole,

    /// Address this node listens on.
    pub bind_addr: SocketAddr,

    /// The port this node advertises to others, sent in message bodies.
    /// Must be preferred over the ephemeral TCP source port by every
    /// recipient (see the advertised-port design note).
    pub advertised_port: u16,

    /// Required for peer role; unused (the tracker serves, it does not dial
    /// itself) for tracker role.
    pub tracker_addr: Option<SocketAddr>,

    /// Shared connection secret checked at CONNECT_REQUEST.
    pub password: String,

    pub capacity: Capacity,

    /// Root directory for versioned file blobs (C8).
    pub storage_root: PathBuf,

    /// Path to this node's metadata database file (C3).
    pub db_path: PathBuf,

    pub connect_timeout: Duration,
    pub max_frame_len: u32,
    pub acceptor_poll_interval: Duration,
    pub download_max_attempts: u32,
    pub replication_level: usize,

    pub log_level: String,
}

impl NodeConfig {
    pub fn builder(role: NodeRole) -> NodeConfigBuilder {
        NodeConfigBuilder::new(role)
    }
}

/// Builder with concrete defaults matching the tunables named in the
/// configuration design; `build()` runs the validations that make an
/// inconsistent configuration a fatal startup error rather than a runtime
/// surprise.
pub struct NodeConfigBuilder {
    role: NodeRole,
    bind_addr: SocketAddr,
    advertised_port: Option<u16>,
    tracker_addr: Option<SocketAddr>,
    password: String,
    capacity: Capacity,
    storage_root: PathBuf,
    db_path: Option<PathBuf>,
    connect_timeout: Duration,
    max_frame_len: u32,
    acceptor_poll_interval: Duration,
    download_max_attempts: u32,
    replication_level: usize,
    log_level: String,
}

impl NodeConfigBuilder {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertised_port: None,
            tracker_addr: None,
            password: String::new(),
            capacity: Capacity::default(),
            storage_root: PathBuf::from("./storage"),
            db_path: None,
            connect_timeout: Duration::from_secs(5),
            max_frame_len: 256 * 1024 * 1024,
            acceptor_poll_interval: Duration::from_millis(250),
            download_max_attempts: 3,
            replication_level: 100,
            log_level: "info".to_string(),
        }
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn advertised_port(mut self, port: u16) -> Self {
        self.advertised_port = Some(port);
        self
    }

    pub fn tracker_addr(mut self, addr: SocketAddr) -> Self {
        self.tracker_addr = Some(addr);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn storage_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_root = path.into();
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn download_max_attempts(mut self, attempts: u32) -> Self {
        self.download_max_attempts = attempts;
        self
    }

    pub fn replication_level(mut self, level: usize) -> Self {
        self.replication_level = level;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build(self) -> DfsResult<NodeConfig> {
        if self.role == NodeRole::Peer && self.tracker_addr.is_none() {
            return Err(NodeError::MissingConfiguration {
                field: "tracker_addr".to_string(),
            });
        }

        let advertised_port = match self.advertised_port {
            Some(p) => p,
            None if self.bind_addr.port() != 0 => self.bind_addr.port(),
            None => {
                return Err(NodeError::MissingConfiguration {
                    field: "advertised_port".to_string(),
                })
            }
        };

        if self.role == NodeRole::Peer && self.password.is_empty() {
            return Err(NodeError::Configuration {
                field: "password".to_string(),
                message: "peer role requires a non-empty connection password".to_string(),
            });
        }

        let db_path = self.db_path.unwrap_or_else(|| {
            let name = match self.role {
                NodeRole::Tracker => "tracker.db",
                NodeRole::Peer => "peer.db",
            };
            self.storage_root.join(name)
        });

        Ok(NodeConfig {
            role: self.role,
            bind_addr: self.bind_addr,
            advertised_port,
            tracker_addr: self.tracker_addr,
            password: self.password,
            capacity: self.capacity,
            storage_root: self.storage_root,
            db_path,
            connect_timeout: self.connect_timeout,
            max_frame_len: self.max_frame_len,
            acceptor_poll_interval: self.acceptor_poll_interval,
            download_max_attempts: self.download_max_attempts,
            replication_level: self.replication_level,
            log_level: self.log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_without_tracker_addr_fails_validation() {
        let result = NodeConfig::builder(NodeRole::Peer)
            .password("secret")
            .build();
        assert!(matches!(
            result,
            Err(NodeError::MissingConfiguration { field }) if field == "tracker_addr"
        ));
    }

    #[test]
    fn peer_without_password_fails_validation() {
        let result = NodeConfig::builder(NodeRole::Peer)
            .tracker_addr("127.0.0.1:12345".parse().unwrap())
            .advertised_port(11111)
            .build();
        assert!(matches!(result, Err(NodeError::Configuration { .. })));
    }

    #[test]
    fn tracker_builds_with_defaults() {
        let cfg = NodeConfig::builder(NodeRole::Tracker)
            .advertised_port(12345)
            .build()
            .unwrap();
        assert_eq!(cfg.advertised_port, 12345);
        assert_eq!(cfg.download_max_attempts, 3);
    }

    #[test]
    fn advertised_port_falls_back_to_bind_port() {
        let cfg = NodeConfig::builder(NodeRole::Tracker)
            .bind_addr("127.0.0.1:12345".parse().unwrap())
            .build()
            .unwrap();
        assert_eq!(cfg.advertised_port, 12345);
    }
}
