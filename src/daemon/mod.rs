//! The daemon: one machine's bridge between its OS clipboard and the
//! hub.
//!
//! [`Session`] owns the outbound connection and its retry policy; the
//! sync loop in [`sync`] owns the loop-prevention shadow and the OS
//! clipboard capability. They communicate over bounded channels so a
//! hub outage backpressures producers instead of dropping clipboard
//! events.

pub mod sync;

use crate::clipboard::ClipboardError;
use crate::config::Config;
use crate::protocol::{Action, ClipboardValue, ProtocolError, WireMessage};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Daemon errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Could not reach or upgrade to the hub
    #[error("failed to connect to hub: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Register/ready exchange failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Wire protocol violation
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local clipboard capability failure
    #[error("clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    /// Invalid hub URL
    #[error("bad hub url: {0}")]
    BadUrl(String),
}

/// Depth of the outbound message queue. Producers block when it fills:
/// clipboard events are not safe to drop silently.
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Depth of the session-to-sync-loop event queue.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Events the session surfaces to the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed (first connection or a reconnection); the
    /// sync loop should re-announce current local state.
    Connected {
        /// Identity the hub assigned
        identity: String,
    },

    /// The universal clipboard changed remotely.
    Remote {
        /// Identity of the daemon that pushed the change
        origin: String,
        /// The new authoritative value
        value: ClipboardValue,
    },

    /// Private reply to a daemon-listing request.
    Listing(String),
}

/// Connection settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the hub
    pub hub_url: String,
    /// `Authorization` header value sent with the upgrade
    pub authorization: String,
    /// Identity requested in the first handshake
    pub identity: String,
    /// Pause between reconnection attempts
    pub reconnect_interval: Duration,
}

impl SessionConfig {
    /// Derive session settings from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        let credentials = format!("{}:{}", config.auth.user, config.auth.pass);
        Self {
            hub_url: config.daemon.hub_url.clone(),
            authorization: format!("Basic {}", BASE64.encode(credentials)),
            identity: config.daemon_identity(),
            reconnect_interval: Duration::from_secs(config.daemon.reconnect_secs),
        }
    }
}

/// Sending half handed to the sync loop and CLI: messages queued here
/// are written to the hub by the session's write half.
pub type Outbound = mpsc::Sender<WireMessage>;

/// One daemon-side connection with reconnection.
///
/// State machine: `Disconnected -> Handshaking -> Active`, and back to
/// `Disconnected` with a ticking retry on any transport error. Retries
/// continue for as long as the process lives.
pub struct Session {
    config: SessionConfig,
    outbound_rx: mpsc::Receiver<WireMessage>,
    events_tx: mpsc::Sender<SessionEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    /// Create a session plus the handles its collaborators use: the
    /// outbound queue sender and the event receiver.
    pub fn new(
        config: SessionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, Outbound, mpsc::Receiver<SessionEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let session = Self {
            config,
            outbound_rx,
            events_tx,
            shutdown,
        };
        (session, outbound_tx, events_rx)
    }

    /// Run until shutdown. Connection failures are logged and retried
    /// forever; they never surface to the caller.
    pub async fn run(mut self) {
        let mut identity = self.config.identity.clone();

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.connect_and_handshake(&identity).await {
                Ok((ws, assigned)) => {
                    if assigned != identity {
                        info!("conflict identity, hub assigned: {assigned}");
                        identity = assigned;
                    }
                    info!("connected to hub as {identity}");

                    if self
                        .events_tx
                        .send(SessionEvent::Connected {
                            identity: identity.clone(),
                        })
                        .await
                        .is_err()
                    {
                        return; // sync loop is gone, nothing left to do
                    }

                    match self.run_active(ws, &identity).await {
                        ActiveExit::Shutdown => return,
                        ActiveExit::Disconnected => {
                            warn!("lost connection to hub, will retry");
                        }
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    debug!(
                        "retry in {} seconds..",
                        self.config.reconnect_interval.as_secs()
                    );
                }
            }

            // retry ticker, interruptible by shutdown
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = self.shutdown.changed() => return,
            }
        }
    }

    /// `Disconnected -> Handshaking -> Active`: open the transport,
    /// send `register`, block for exactly one reply and require
    /// `ready`. Returns the socket and the identity the hub assigned.
    async fn connect_and_handshake(
        &self,
        identity: &str,
    ) -> Result<(HubSocket, String), DaemonError> {
        let mut request = self
            .config
            .hub_url
            .clone()
            .into_client_request()
            .map_err(|e| DaemonError::BadUrl(e.to_string()))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            self.config
                .authorization
                .parse()
                .map_err(|_| DaemonError::BadUrl("credentials are not header-safe".into()))?,
        );

        let (mut ws, _) = connect_async(request).await?;

        let frame = WireMessage::register(identity).encode()?;
        ws.send(WsMessage::Binary(frame.into())).await?;

        let reply = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Binary(b))) => break WireMessage::decode(&b)?,
                Some(Ok(WsMessage::Text(t))) => break WireMessage::decode(t.as_bytes())?,
                Some(Ok(_)) => continue, // ping/pong
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(DaemonError::Handshake(
                        "connection closed during handshake".into(),
                    ))
                }
            }
        };

        match reply.action {
            Action::Ready => Ok((ws, reply.user_id)),
            Action::Terminate => Err(DaemonError::Handshake(format!(
                "hub refused registration: {}",
                reply.message
            ))),
            other => Err(DaemonError::Handshake(format!(
                "expected ready, got {other}"
            ))),
        }
    }

    /// Steady state: drain the outbound queue into the socket and
    /// dispatch inbound frames, until either side fails.
    async fn run_active(&mut self, ws: HubSocket, identity: &str) -> ActiveExit {
        let (mut sink, mut source) = ws.split();

        loop {
            tokio::select! {
                queued = self.outbound_rx.recv() => {
                    let Some(mut msg) = queued else {
                        return ActiveExit::Shutdown;
                    };
                    if msg.user_id.is_empty() {
                        msg.user_id = identity.to_string();
                    }
                    let frame = match msg.encode() {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("dropping unencodable message: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Binary(frame.into())).await {
                        warn!("failed to write message to hub: {e}");
                        return ActiveExit::Disconnected;
                    }
                }
                frame = source.next() => {
                    let payload = match frame {
                        Some(Ok(WsMessage::Binary(b))) => b.to_vec(),
                        Some(Ok(WsMessage::Text(t))) => t.as_bytes().to_vec(),
                        Some(Ok(WsMessage::Close(_))) | None => return ActiveExit::Disconnected,
                        Some(Ok(_)) => continue, // ping/pong
                        Some(Err(e)) => {
                            warn!("failed to read message from hub: {e}");
                            return ActiveExit::Disconnected;
                        }
                    };
                    match WireMessage::decode(&payload) {
                        Err(e) => warn!("dropping malformed frame: {e}"),
                        Ok(msg) => {
                            if !self.handle_inbound(msg).await {
                                return ActiveExit::Shutdown;
                            }
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    // best-effort terminate notice before closing
                    if let Ok(frame) = WireMessage::terminate(identity, "daemon shutting down").encode() {
                        let _ = sink.send(WsMessage::Binary(frame.into())).await;
                    }
                    let _ = sink.close().await;
                    return ActiveExit::Shutdown;
                }
            }
        }
    }

    /// Dispatch one inbound message. Returns `false` when the sync
    /// loop is gone and the session should stop.
    async fn handle_inbound(&self, msg: WireMessage) -> bool {
        match msg.action {
            Action::ClipboardChanged => {
                let value = match ClipboardValue::decode(&msg.data) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("failed to parse clipboard data: {e}");
                        return true;
                    }
                };
                debug!("universal clipboard changed from {}", msg.user_id);
                self.events_tx
                    .send(SessionEvent::Remote {
                        origin: msg.user_id,
                        value,
                    })
                    .await
                    .is_ok()
            }
            Action::ListDaemonsResponse => self
                .events_tx
                .send(SessionEvent::Listing(
                    String::from_utf8_lossy(&msg.data).into_owned(),
                ))
                .await
                .is_ok(),
            Action::Terminate => {
                info!("hub terminated the session: {}", msg.message);
                true // the read half will observe the close next
            }
            other => {
                debug!("ignoring message with action {other}");
                true
            }
        }
    }
}

enum ActiveExit {
    Disconnected,
    Shutdown,
}

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Run a full daemon: session plus sync loop, until shutdown.
pub async fn run_daemon(
    config: &Config,
    clipboard: std::sync::Arc<dyn crate::clipboard::LocalClipboard>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let session_config = SessionConfig::from_config(config);
    info!("daemon id: {}", session_config.identity);

    let (session, outbound, events) = Session::new(session_config, shutdown.clone());
    let sync = sync::SyncLoop::new(clipboard, outbound);

    let mut session_task = tokio::spawn(session.run());
    let result = sync.run(events, shutdown).await;

    // the sync loop dropped its outbound sender and event receiver;
    // the session observes that and winds down with a terminate notice
    if tokio::time::timeout(Duration::from_secs(2), &mut session_task)
        .await
        .is_err()
    {
        session_task.abort();
    }
    result
}
