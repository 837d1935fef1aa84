//! In-Memory Transport
//!
//! Loopback transport for tests and demos. Each `connect()` creates a fresh
//! session whose far end is handed to the [`MemoryServer`] as a
//! [`MemoryPeer`], which can push frames, read control messages and sever
//! the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::application::ports::{Transport, TransportError, TransportSession};

#[derive(Debug, Default)]
struct Shared {
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

/// Create a connected transport/server pair.
#[must_use]
pub fn memory_transport() -> (MemoryTransport, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());

    (
        MemoryTransport {
            accept_tx,
            shared: Arc::clone(&shared),
        },
        MemoryServer { accept_rx, shared },
    )
}

/// Client side of the loopback.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<TransportSession, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (client_tx, client_rx) = futures_mpsc::unbounded::<String>();
        let (server_tx, server_rx) = futures_mpsc::unbounded::<Result<String, TransportError>>();

        self.accept_tx
            .send(MemoryPeer {
                to_client: server_tx,
                from_client: client_rx,
            })
            .map_err(|_| TransportError::Connect("memory server dropped".to_string()))?;

        let outbound = client_tx.sink_map_err(|e| TransportError::Send(e.to_string()));
        Ok(TransportSession::new(Box::pin(outbound), server_rx.boxed()))
    }

    fn endpoint(&self) -> String {
        "memory://feed".to_string()
    }
}

/// Server side of the loopback: accepts sessions.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Wait for the next session. `None` once the transport is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Make subsequent `connect()` calls fail.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `connect()` calls so far, successful or not.
    #[must_use]
    pub fn connection_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Far end of one session.
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: futures_mpsc::UnboundedSender<Result<String, TransportError>>,
    from_client: futures_mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Send a text frame to the client. Returns `false` if the session is gone.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Fail the session with a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Next frame the client sent. `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Next frame already sent by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Sever the session as if the network dropped.
    pub fn disconnect(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test]
    async fn accept_waits_for_connect() {
        let (transport, mut server) = memory_transport();
        let mut accept = task::spawn(server.accept());

        assert_pending!(accept.poll());

        let _session = transport.connect().await.unwrap();
        assert!(accept.is_woken());
        assert!(assert_ready!(accept.poll()).is_some());
    }

    #[tokio::test]
    async fn session_round_trip() {
        let (transport, mut server) = memory_transport();

        let mut session = transport.connect().await.unwrap();
        let mut peer = server.accept().await.unwrap();

        peer.push("hello");
        assert_eq!(session.inbound.next().await, Some(Ok("hello".to_string())));

        session.outbound.send("world".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn disconnect_ends_inbound() {
        let (transport, mut server) = memory_transport();
        let mut session = transport.connect().await.unwrap();

        server.accept().await.unwrap().disconnect();

        assert!(session.inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn refusing_server_fails_connect() {
        let (transport, server) = memory_transport();
        server.set_refusing(true);

        let err = transport.connect().await.unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)));
        assert_eq!(server.connection_attempts(), 1);
    }

    #[tokio::test]
    async fn fail_delivers_error() {
        let (transport, mut server) = memory_transport();
        let mut session = transport.connect().await.unwrap();
        let peer = server.accept().await.unwrap();

        peer.fail(TransportError::Protocol("reset".into()));

        assert_eq!(
            session.inbound.next().await,
            Some(Err(TransportError::Protocol("reset".into())))
        );
    }
}
