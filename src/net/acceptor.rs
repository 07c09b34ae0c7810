//! Acceptor / dispatcher (C4, C5).
//!
//! One acceptor per node. Each accepted socket is handed to a fresh task
//! that reads exactly one framed message, dispatches it through a
//! [`Dispatcher`], writes the reply, and exits. The connection stays open;
//! a subsequent request from the same remote arrives as a brand-new
//! accepted socket handled by a brand-new task. This keeps the connection
//! layer state-free, per the one-message-per-handler design note.

use crate::error::DfsResult;
use crate::net::codec::{read_frame, write_frame};
use crate::protocol::Message;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// A total function from message kind to handler routine. Tracker and peer
/// differ only in which routines are bound behind this trait.
/// `None` signals a message kind the handler table has no routine for;
/// the caller drops the connection rather than replying, matching the
/// protocol-error policy (malformed frame or unknown kind: drop and log).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, msg: Message, peer_addr: SocketAddr) -> Option<Message>;
}

pub struct Acceptor<D: Dispatcher + 'static> {
    listener: TcpListener,
    dispatcher: Arc<D>,
    max_frame_len: u32,
    poll_interval: Duration,
}

impl<D: Dispatcher + 'static> Acceptor<D> {
    pub fn new(
        listener: TcpListener,
        dispatcher: Arc<D>,
        max_frame_len: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            max_frame_len,
            poll_interval,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `shutdown` is signalled. In-flight
    /// handlers are not cancelled; they run to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                debug!("acceptor shutting down");
                return;
            }

            let accept_fut = tokio::time::timeout(self.poll_interval, self.listener.accept());
            tokio::select! {
                accepted = accept_fut => {
                    match accepted {
                        Ok(Ok((socket, peer_addr))) => {
                            let dispatcher = self.dispatcher.clone();
                            let max_frame_len = self.max_frame_len;
                            tokio::spawn(async move {
                                handle_connection(socket, peer_addr, dispatcher, max_frame_len).await;
                            });
                        }
                        Ok(Err(e)) => warn!(error = %e, "accept failed"),
                        Err(_) => {} // poll interval elapsed, loop to recheck shutdown
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("acceptor observed shutdown signal");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_connection<D: Dispatcher + 'static>(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<D>,
    max_frame_len: u32,
) {
    let msg = match read_frame(&mut socket, peer_addr, max_frame_len).await {
        Ok(msg) => msg,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "failed to read request frame");
            return;
        }
    };

    debug!(peer = %peer_addr, kind = msg.kind_name(), "dispatching message");
    let Some(reply) = dispatcher.dispatch(msg, peer_addr).await else {
        warn!(peer = %peer_addr, "no handler for message kind; dropping connection");
        return;
    };

    if let Err(e) = write_frame(&mut socket, &reply).await {
        error!(peer = %peer_addr, error = %e, "failed to write reply frame");
    }
}

/// Test-only helper: read one frame, run a synchronous handler over it, and
/// write back the reply. Used to stand up minimal fake peers in unit tests
/// without pulling in the full [`Dispatcher`] machinery.
pub async fn serve_once<F>(
    socket: &mut TcpStream,
    peer_addr: SocketAddr,
    max_frame_len: u32,
    handler: F,
) -> DfsResult<()>
where
    F: FnOnce(Message) -> Message,
{
    let msg = read_frame(socket, peer_addr, max_frame_len).await?;
    let reply = handler(msg);
    write_frame(socket, &reply).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoDispatcher;

    #[async_trait]
    impl Dispatcher for EchoDispatcher {
        async fn dispatch(&self, _msg: Message, _peer_addr: SocketAddr) -> Option<Message> {
            Some(Message::ConnectResponse { successful: true })
        }
    }

    #[tokio::test]
    async fn acceptor_serves_one_request_and_honors_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let acceptor = Acceptor::new(
            listener,
            Arc::new(EchoDispatcher),
            1024 * 1024,
            Duration::from_millis(20),
        );
        let addr = acceptor.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);

        let server = tokio::spawn(acceptor.run(rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut client,
            &Message::PeerListRequest { file_path: None },
        )
        .await
        .unwrap();
        let reply = read_frame(&mut client, addr, 1024 * 1024).await.unwrap();
        assert_eq!(reply, Message::ConnectResponse { successful: true });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("acceptor should shut down promptly")
            .unwrap();
    }
}
