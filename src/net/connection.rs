//! Outbound connection table (C2).
//!
//! The acceptor handles exactly one request per accepted socket and then
//! closes it (see `net/acceptor.rs`), so there is nothing to gain from
//! caching a stream across calls — a cached entry is always already closed
//! server-side by the time a second `request` would reuse it. `request`
//! therefore dials a fresh connection for every call, matching the
//! original mesh's per-exchange connect (`examples/original_source/
//! communication.py`'s `send_message` opening a new socket on every send).

use crate::error::{DfsResult, NodeError};
use crate::net::codec::{read_frame, write_frame};
use crate::protocol::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Default)]
pub struct ConnectionTable;

impl ConnectionTable {
    pub fn new() -> Self {
        Self
    }

    /// Dial `(host, port)` fresh, send `msg`, read back its reply, and close
    /// the connection.
    pub async fn request(
        &self,
        host: &str,
        port: u16,
        msg: &Message,
        connect_timeout: Duration,
        max_frame_len: u32,
    ) -> DfsResult<Message> {
        let mut stream = self.dial(host, port, connect_timeout).await?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        write_frame(&mut stream, msg).await?;
        read_frame(&mut stream, addr, max_frame_len).await
    }

    async fn dial(&self, host: &str, port: u16, timeout: Duration) -> DfsResult<TcpStream> {
        let addr = format!("{host}:{port}");
        tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NodeError::Connect {
                addr: addr
                    .parse()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port))),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|source| NodeError::Io {
                source,
                path: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::acceptor::serve_once;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn fails_cleanly_when_nothing_listens() {
        let table = ConnectionTable::new();
        let result = table
            .request(
                "127.0.0.1",
                1, // reserved port, nothing listens; expect refusal
                &Message::PeerListRequest { file_path: None },
                Duration::from_millis(200),
                1024,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dials_a_fresh_connection_for_each_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, peer) = listener.accept().await.unwrap();
                let _ = serve_once(&mut socket, peer, 1024 * 1024, |_msg| {
                    Message::ConnectResponse { successful: true }
                })
                .await;
            }
        });

        let table = ConnectionTable::new();
        for _ in 0..2 {
            let reply = table
                .request(
                    "127.0.0.1",
                    port,
                    &Message::ConnectRequest {
                        password: "x".into(),
                        port: 1,
                        max_file_size: 0,
                        max_file_sys_size: 0,
                        curr_file_sys_size: 0,
                    },
                    Duration::from_secs(1),
                    1024 * 1024,
                )
                .await
                .unwrap();
            assert_eq!(reply, Message::ConnectResponse { successful: true });
        }
    }
}
