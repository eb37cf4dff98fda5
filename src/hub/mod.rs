//! The hub: connection registry, handshake and broadcast.
//!
//! The hub accepts WebSocket upgrades gated by the access guard,
//! registers each daemon under a de-duplicated identity, and relays
//! accepted clipboard writes to every other registered daemon.

pub mod registry;

pub use registry::{ConnectionEntry, Registry, SEND_QUEUE_DEPTH};

use crate::guard::{AccessGuard, Decision};
use crate::protocol::{Action, ClipboardValue, ProtocolError, WireMessage};
use crate::store::UniversalClipboard;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

/// Hub errors
#[derive(Debug, Error)]
pub enum HubError {
    /// Listener or socket IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// The server-side relay holding the universal clipboard and the
/// registry of live daemon connections.
pub struct Hub {
    store: Arc<UniversalClipboard>,
    guard: Arc<AccessGuard>,
    registry: Arc<Registry>,
}

impl Hub {
    pub fn new(store: Arc<UniversalClipboard>, guard: Arc<AccessGuard>) -> Self {
        Self {
            store,
            guard,
            registry: Arc::new(Registry::new()),
        }
    }

    /// The live-connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The universal clipboard store.
    pub fn store(&self) -> &Arc<UniversalClipboard> {
        &self.store
    }

    /// Bind `addr` and serve until the shutdown signal flips.
    pub async fn serve_addr(
        self: Arc<Self>,
        addr: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), HubError> {
        let listener = TcpListener::bind(addr).await?;
        info!("hub listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HubError> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let hub = Arc::clone(&self);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = hub.handle_connection(stream, peer, shutdown).await {
                            debug!("connection from {peer} ended: {e}");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("hub shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Drive one client connection from upgrade to close.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HubError> {
        let guard = Arc::clone(&self.guard);
        let auth_callback = move |req: &Request, response: Response| {
            let authorization = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok());
            match guard.check(peer.ip(), authorization) {
                Decision::Granted => Ok(response),
                Decision::Unauthorized => Err(reject(StatusCode::UNAUTHORIZED)),
                Decision::Blocked => Err(reject(StatusCode::FORBIDDEN)),
            }
        };
        let mut ws = accept_hdr_async(stream, auth_callback).await?;

        // Handshake: the first frame must be a register action.
        let requested_id = match read_handshake(&mut ws).await {
            Ok(id) => id,
            Err(reason) => {
                warn!("handshake with {peer} failed: {reason}");
                let msg = WireMessage::terminate("", reason);
                if let Ok(frame) = msg.encode() {
                    let _ = ws.send(WsMessage::Binary(frame.into())).await;
                }
                let _ = ws.close(None).await;
                return Ok(());
            }
        };

        let (tx, mut rx) = mpsc::channel::<WireMessage>(SEND_QUEUE_DEPTH);
        let (sequence, identity) = self.registry.register(&requested_id, tx.clone());
        info!("registered daemon {identity} (seq {sequence}) from {peer}");

        let (mut sink, mut source) = ws.split();

        // Sole writer on this socket; the queue serializes all sends.
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let frame = match msg.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("dropping unencodable message: {e}");
                        continue;
                    }
                };
                if sink.send(WsMessage::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        if tx.send(WireMessage::ready(identity.as_str())).await.is_err() {
            let remaining = self.registry.remove(sequence);
            info!("remaining daemon subscribers: {remaining}");
            return Ok(());
        }

        loop {
            tokio::select! {
                frame = source.next() => {
                    let payload = match frame {
                        Some(Ok(WsMessage::Binary(b))) => b.to_vec(),
                        Some(Ok(WsMessage::Text(t))) => t.as_bytes().to_vec(),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => continue, // ping/pong
                        Some(Err(e)) => {
                            debug!("read error from {identity}: {e}");
                            break;
                        }
                    };
                    match WireMessage::decode(&payload) {
                        // steady state: malformed frames are dropped,
                        // the connection stays up
                        Err(e) => warn!("dropping malformed frame from {identity}: {e}"),
                        Ok(msg) => {
                            if !self.dispatch(msg, &identity, &tx).await {
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = tx.try_send(WireMessage::terminate("", "hub shutting down"));
                    break;
                }
            }
        }

        // remove before the socket is torn down so broadcasts never
        // see a dead entry
        let remaining = self.registry.remove(sequence);
        info!("daemon {identity} left, remaining subscribers: {remaining}");
        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    /// Steady-state dispatch. Returns `false` when the connection
    /// should close.
    async fn dispatch(
        &self,
        msg: WireMessage,
        identity: &str,
        reply: &mpsc::Sender<WireMessage>,
    ) -> bool {
        match msg.action {
            Action::ClipboardPut => {
                if msg.data.len() > crate::MAX_PAYLOAD_SIZE {
                    warn!(
                        "dropping oversized clipboard payload from {identity} ({} bytes)",
                        msg.data.len()
                    );
                    return true;
                }
                let value = match ClipboardValue::decode(&msg.data) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("bad clipboard payload from {identity}: {e}");
                        return true;
                    }
                };
                let (kind, raw) = value.into_bytes();
                info!("universal clipboard update from: {identity}");
                if self.store.write(kind, raw.clone()) {
                    let value = ClipboardValue::from_bytes(kind, &raw);
                    self.registry
                        .broadcast(&WireMessage::clipboard_changed(identity, &value));
                }
            }
            Action::ListDaemonsRequest => {
                debug!("list active daemons request from {identity}");
                let response = WireMessage::list_daemons_response(self.registry.list_table());
                if reply.send(response).await.is_err() {
                    return false;
                }
            }
            Action::Terminate => {
                debug!("daemon {identity} announced termination");
                return false;
            }
            other => {
                // forward compatibility: never fail the connection
                // over an unhandled action
                debug!("ignoring message with action {other} from {identity}");
            }
        }
        true
    }
}

/// Read and validate the register frame opening a connection.
async fn read_handshake(ws: &mut WebSocketStream<TcpStream>) -> Result<String, &'static str> {
    let payload = match ws.next().await {
        Some(Ok(WsMessage::Binary(b))) => b.to_vec(),
        Some(Ok(WsMessage::Text(t))) => t.as_bytes().to_vec(),
        _ => return Err("connection closed before handshake"),
    };
    let msg = WireMessage::decode(&payload).map_err(|_| "invalid message format")?;
    if msg.action != Action::Register {
        return Err("unsupported action");
    }
    Ok(msg.user_id)
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}
