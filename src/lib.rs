//! Starmesh: a tracker-coordinated distributed file replication mesh.
//!
//! A mesh is a single tracker plus any number of peers in a star topology.
//! Peers write, read, delete, move, and archive files through their local
//! [`node::PeerCore`]; the tracker ([`tracker::Tracker`]) holds the
//! authoritative file and peer tables and fans out changes so every online
//! peer converges on the same content.
//!
//! # Quick start
//!
//! ```no_run
//! use starmesh::config::{NodeConfig, NodeRole};
//! use starmesh::node::PeerCore;
//! use starmesh::store::MetadataStore;
//!
//! # async fn run() -> starmesh::error::DfsResult<()> {
//! let config = NodeConfig::builder(NodeRole::Peer)
//!     .tracker_addr("127.0.0.1:9000".parse().unwrap())
//!     .password("secret")
//!     .build()?;
//! let store = MetadataStore::open(config.db_path.clone(), NodeRole::Peer)?;
//! let peer = PeerCore::new(config, store);
//! peer.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod fsstore;
pub mod net;
pub mod node;
pub mod protocol;
pub mod store;
pub mod tracker;

pub use config::{NodeConfig, NodeRole};
pub use error::{DfsResult, ErrorContext, NodeError};
pub use node::PeerCore;
pub use tracker::Tracker;
