//! `tokio-tungstenite` backed transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace};

use crate::{Connection, ConnectionId, Transport, TransportError};

type Socket = WebSocketStream<TcpStream>;

pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!(addr, "listening for websocket clients");
        Ok(Self { listener })
    }
}

/// `Authorization: Bearer <token>` from the upgrade request.
fn bearer_from(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;

        let mut bearer = None;
        let on_upgrade = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            bearer = bearer_from(req);
            Ok(resp)
        };
        let socket = tokio_tungstenite::accept_hdr_async(tcp, on_upgrade)
            .await
            .map_err(|e| TransportError::Upgrade {
                peer,
                source: Box::new(e),
            })?;

        let id = ConnectionId::next();
        debug!(%id, %peer, bearer = bearer.is_some(), "websocket upgraded");

        let (writer, reader) = socket.split();
        Ok(WebSocketConnection {
            id,
            peer,
            bearer,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            opened: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        })
    }
}

pub struct WebSocketConnection {
    id: ConnectionId,
    peer: SocketAddr,
    bearer: Option<String>,
    writer: Mutex<SplitSink<Socket, Message>>,
    reader: Mutex<SplitStream<Socket>>,
    opened: Instant,
    /// Milliseconds after `opened` at which the peer last sent a frame.
    last_seen_ms: AtomicU64,
}

impl WebSocketConnection {
    fn touch(&self) {
        let at = self.opened.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(at, Ordering::Relaxed);
    }

    fn socket_error(&self, e: WsError) -> TransportError {
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed(self.peer),
            other => TransportError::Socket {
                peer: self.peer,
                source: Box::new(other),
            },
        }
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn bearer_token(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    /// JSON goes out as a text frame; anything that is not UTF-8 as
    /// binary.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let msg = match std::str::from_utf8(frame) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(frame.to_vec().into()),
        };
        let mut writer = self.writer.lock().await;
        writer.send(msg).await.map_err(|e| self.socket_error(e))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        while let Some(msg) = reader.next().await {
            if msg.is_ok() {
                self.touch();
            }
            match msg {
                Ok(Message::Text(text)) => return Ok(Some(text.as_bytes().to_vec())),
                Ok(Message::Binary(data)) => return Ok(Some(data.to_vec())),
                Ok(Message::Close(frame)) => {
                    trace!(id = %self.id, ?frame, "peer sent close");
                    return Ok(None);
                }
                // Pings and pongs only count as activity.
                Ok(_) => {}
                Err(WsError::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(self.socket_error(e)),
            }
        }
        Ok(None)
    }

    fn idle_for(&self) -> Duration {
        let seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(seen)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(|e| self.socket_error(e))
    }
}
