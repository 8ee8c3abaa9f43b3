//! Channel transports.
//!
//! A [`Connector`] opens one bidirectional text-frame link. The link is
//! exposed as a pair of mpsc channels so the connection task never touches
//! socket I/O directly; a background task per link bridges the socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use huddle_shared::constants::TENANT_HEADER;
use huddle_shared::{ClientEvent, ServerEvent, TenantId};

use crate::error::TransportError;

const LINK_BUFFER: usize = 256;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: String,
    /// Sent out-of-band at connect time, never inside event payloads.
    pub tenant: TenantId,
    pub auth_token: Option<String>,
}

/// An open link: frames written to `outbound` go to the server, frames from
/// the server arrive on `inbound`. `inbound` yields `None` once the link is gone.
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, target: &ConnectTarget) -> Result<Link, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Upgrade request with the tenant (and bearer token, if any) as headers.
fn handshake_request(target: &ConnectTarget) -> Result<Request, TransportError> {
    let mut request = target
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(format!("invalid url: {e}")))?;

    let tenant = HeaderValue::from_str(target.tenant.as_str())
        .map_err(|e| TransportError::Connect(format!("invalid tenant id: {e}")))?;
    request.headers_mut().insert(TENANT_HEADER, tenant);

    if let Some(ref token) = target.auth_token {
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Connect(format!("invalid auth token: {e}")))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);
    }
    Ok(request)
}

/// WebSocket transport (text frames carrying JSON events).
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Link, TransportError> {
        let request = handshake_request(target)?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        debug!(frame = ?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-process transport. Every successful `connect` hands a [`MemoryPeer`]
/// to the paired [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    failures: Arc<AtomicUsize>,
}

pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory link. Dropping it disconnects the client.
pub struct MemoryPeer {
    pub target: ConnectTarget,
    pub from_client: mpsc::Receiver<String>,
    pub to_client: mpsc::Sender<String>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                accept_tx,
                failures: Arc::new(AtomicUsize::new(0)),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Link, TransportError> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);

        self.accept_tx
            .send(MemoryPeer {
                target: target.clone(),
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| TransportError::Connect("server gone".into()))?;

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

impl MemoryPeer {
    /// Next decodable event from the client. `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.from_client.recv().await {
            match ClientEvent::from_json(&frame) {
                Ok(event) => return Some(event),
                Err(e) => warn!(error = %e, "Memory peer got malformed frame"),
            }
        }
        None
    }

    /// Every event the client has written so far, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(event) = ClientEvent::from_json(&frame) {
                events.push(event);
            }
        }
        events
    }

    pub async fn send(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let frame = event.to_json()?;
        self.to_client
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(frame.into())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_shared::UserId;

    fn target(token: Option<&str>) -> ConnectTarget {
        ConnectTarget {
            url: "ws://127.0.0.1:5000/socket".into(),
            tenant: TenantId::new("acme"),
            auth_token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_handshake_carries_tenant_and_token() {
        let request = handshake_request(&target(Some("s3cret"))).unwrap();
        assert_eq!(request.headers()[TENANT_HEADER], "acme");
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer s3cret");

        let anonymous = handshake_request(&target(None)).unwrap();
        assert!(anonymous.headers().get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_handshake_rejects_bad_url() {
        let mut bad = target(None);
        bad.url = "not a url".into();
        assert!(matches!(
            handshake_request(&bad),
            Err(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_link_carries_events_both_ways() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut link = connector.connect(&target(None)).await.unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.target.tenant, TenantId::new("acme"));

        let join = ClientEvent::Join(UserId(3)).to_json().unwrap();
        link.outbound.send(join).await.unwrap();
        assert_eq!(
            peer.recv().await,
            Some(ClientEvent::Join(UserId(3)))
        );

        peer.send(&ServerEvent::CallEnded).await.unwrap();
        let frame = link.inbound.recv().await.unwrap();
        assert_eq!(ServerEvent::from_json(&frame).unwrap(), ServerEvent::CallEnded);

        drop(peer);
        assert!(link.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_connector_scripted_failures() {
        let (connector, _server) = MemoryConnector::pair();
        connector.fail_next(1);
        assert!(connector.connect(&target(None)).await.is_err());
        assert!(connector.connect(&target(None)).await.is_ok());
    }
}
