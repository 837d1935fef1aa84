//! WebSocket Transport
//!
//! Connects to the feed over WebSocket (`ws://` or `wss://` via rustls).
//!
//! # Frames
//!
//! - Text frames are forwarded as-is
//! - Binary frames are decoded as UTF-8
//! - Ping/pong frames are handled by tungstenite and never surface
//! - A close frame ends the session

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use crate::application::ports::{Transport, TransportError, TransportSession};
use crate::infrastructure::config::Credentials;

/// WebSocket transport for the market data feed.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    credentials: Option<Credentials>,
}

impl WebSocketTransport {
    /// Create a transport for `url`, authenticating with `credentials` if set.
    #[must_use]
    pub const fn new(url: String, credentials: Option<Credentials>) -> Self {
        Self { url, credentials }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<TransportSession, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid feed URL: {e}")))?;

        if let Some(credentials) = &self.credentials {
            let value = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key()))
                .map_err(|e| TransportError::Connect(format!("invalid API key: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), url = %self.url, "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let outbound = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let inbound = read
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(String::from_utf8(bytes.to_vec()).map_err(|_| TransportError::InvalidUtf8))
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!(frame = ?frame, "Server sent close frame");
                        Some(Err(TransportError::Closed))
                    }
                    // Ignore other message types
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Protocol(e.to_string()))),
                })
            })
            .boxed();

        Ok(TransportSession::new(Box::pin(outbound), inbound))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn server() -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            ws.send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Binary(b"binary".to_vec().into()))
                .await
                .unwrap();

            let mut received = Vec::new();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                received.push(text.as_str().to_owned());
            }
            ws.close(None).await.unwrap();
            received
        });

        (url, handle)
    }

    #[tokio::test]
    async fn exchanges_frames_with_server() {
        let (url, handle) = server().await;
        let transport = WebSocketTransport::new(url, None);

        let mut session = transport.connect().await.unwrap();

        assert_eq!(
            session.inbound.next().await,
            Some(Ok(r#"{"type":"heartbeat"}"#.to_string()))
        );
        assert_eq!(session.inbound.next().await, Some(Ok("binary".to_string())));

        session
            .outbound
            .send(r#"{"type":"unsubscribe","id":1}"#.to_string())
            .await
            .unwrap();
        assert_eq!(session.inbound.next().await, Some(Err(TransportError::Closed)));

        let received = handle.await.unwrap();
        assert_eq!(received, vec![r#"{"type":"unsubscribe","id":1}"#.to_string()]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(format!("ws://{addr}"), None);

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn invalid_url_fails_to_connect() {
        let transport = WebSocketTransport::new("not a url".to_string(), None);
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
    }

    #[test]
    fn endpoint_is_url() {
        let transport = WebSocketTransport::new("wss://feed.example.com/v1".to_string(), None);
        assert_eq!(transport.endpoint(), "wss://feed.example.com/v1");
    }
}
