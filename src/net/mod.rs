//! Transport layer: wire framing, acceptor/dispatcher, and the outbound
//! connection table.

pub mod acceptor;
pub mod codec;
pub mod connection;
