//! Length-prefixed framing (C1): `[u32 little-endian length][payload]`.
//!
//! The codec is strictly synchronous per connection: one frame in, one
//! frame out. It does not multiplex requests; callers coordinate that at a
//! higher layer (see [`crate::net::connection`]).

use crate::error::{DfsResult, NodeError};
use crate::protocol::Message;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Serialize `msg` and write it as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> DfsResult<()> {
    let payload = bincode::serde::encode_to_vec(msg, bincode_config())
        .map_err(|e| NodeError::Encode(e.to_string()))?;
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|source| NodeError::Io { source, path: None })?;
    writer
        .write_all(&payload)
        .await
        .map_err(|source| NodeError::Io { source, path: None })?;
    writer
        .flush()
        .await
        .map_err(|source| NodeError::Io { source, path: None })?;
    Ok(())
}

/// Read exactly one length-prefixed frame and decode it.
///
/// `peer_addr` is used only to attribute the short-read error usefully.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    peer_addr: SocketAddr,
    max_frame_len: u32,
) -> DfsResult<Message> {
    let mut len_buf = [0u8; 4];
    read_exact_or_broken(reader, &mut len_buf, peer_addr).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > max_frame_len {
        return Err(NodeError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_or_broken(reader, &mut payload, peer_addr).await?;

    let (msg, _) = bincode::serde::decode_from_slice(&payload, bincode_config())
        .map_err(|e| NodeError::Decode(e.to_string()))?;
    Ok(msg)
}

/// `AsyncReadExt::read_exact` that reports a zero-byte short read as a
/// broken connection instead of the generic `UnexpectedEof`, matching the
/// receive discipline in the wire codec design.
async fn read_exact_or_broken<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    peer_addr: SocketAddr,
) -> DfsResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|source| NodeError::Io { source, path: None })?;
        if n == 0 {
            return Err(NodeError::ShortRead {
                addr: peer_addr,
                got: filled,
                expected: buf.len(),
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn addr() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[tokio::test]
    async fn round_trips_every_message_family() {
        let samples = vec![
            Message::ConnectRequest {
                password: "pw".into(),
                port: 11111,
                max_file_size: 1,
                max_file_sys_size: 2,
                curr_file_sys_size: 3,
            },
            Message::ConnectResponse { successful: true },
            Message::PeerListRequest { file_path: None },
            Message::List { file_list: vec![] },
            Message::ArchiveResponse {
                file_path: "a.txt".into(),
                archived: true,
            },
        ];

        for msg in samples {
            let mut buf = Vec::new();
            write_frame(&mut buf, &msg).await.unwrap();
            let mut cursor = Cursor::new(buf);
            let decoded = read_frame(&mut cursor, addr(), 1024 * 1024).await.unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, addr(), 10).await.unwrap_err();
        assert!(matches!(err, NodeError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn truncated_frame_is_a_short_read_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor, addr(), 1024).await.unwrap_err();
        assert!(matches!(err, NodeError::ShortRead { .. }));
    }
}
