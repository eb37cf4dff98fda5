//! The local sync loop: OS clipboard in, hub out, and back.
//!
//! Feedback loops are the hazard here. Writing a remote value to the
//! OS clipboard makes the OS watcher fire, and pushing that event back
//! to the hub would echo forever. The loop therefore keeps a shadow of
//! the last value it wrote or read locally and suppresses any event
//! equal to it, on both the local and the remote side.

use crate::clipboard::LocalClipboard;
use crate::daemon::{DaemonError, Outbound, SessionEvent};
use crate::protocol::{ClipboardKind, ClipboardValue, WireMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bridges one machine's clipboard to the hub through a session.
pub struct SyncLoop {
    clipboard: Arc<dyn LocalClipboard>,
    outbound: Outbound,
    /// Last value written or read locally
    shadow: Option<(ClipboardKind, Vec<u8>)>,
}

impl SyncLoop {
    pub fn new(clipboard: Arc<dyn LocalClipboard>, outbound: Outbound) -> Self {
        Self {
            clipboard,
            outbound,
            shadow: None,
        }
    }

    /// Run until shutdown, the session ends, or the clipboard watch
    /// stream closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), DaemonError> {
        let mut local_events = self.clipboard.watch().await?;

        loop {
            tokio::select! {
                local = local_events.recv() => {
                    let Some((kind, data)) = local else {
                        warn!("clipboard watch stream closed");
                        return Ok(());
                    };
                    if !self.push_local(kind, data).await {
                        return Ok(());
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Ok(()); // session gone
                    };
                    if !self.handle_session_event(event).await {
                        return Ok(());
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Local clipboard changed. Returns `false` when the session is
    /// gone.
    async fn push_local(&mut self, kind: ClipboardKind, data: Vec<u8>) -> bool {
        if self
            .shadow
            .as_ref()
            .is_some_and(|(k, d)| *k == kind && *d == data)
        {
            // our own write coming back through the OS watcher
            debug!("suppressing local echo");
            return true;
        }

        self.shadow = Some((kind, data.clone()));
        let value = ClipboardValue::from_bytes(kind, &data);
        debug!("local clipboard changed, pushing to hub");
        // the session fills in our identity
        self.outbound
            .send(WireMessage::clipboard_put("", &value))
            .await
            .is_ok()
    }

    async fn handle_session_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Remote { origin, value } => {
                let (kind, raw) = value.into_bytes();
                if self
                    .shadow
                    .as_ref()
                    .is_some_and(|(k, d)| *k == kind && *d == raw)
                {
                    debug!("remote value equals local shadow, skipping write");
                    return true;
                }

                info!("universal clipboard has changed from {origin}, sync with local");
                if let Err(e) = self.clipboard.write(kind, &raw).await {
                    warn!("cannot write local clipboard: {e}");
                }
                // update the shadow even on a failed write so the
                // same value is not retried on every notification
                self.shadow = Some((kind, raw));
                true
            }
            SessionEvent::Connected { identity } => {
                debug!("session connected as {identity}, re-announcing local state");
                if !self.reannounce().await {
                    return false;
                }
                // ask who else is connected; the reply is logged
                self.outbound
                    .send(WireMessage::list_daemons_request(""))
                    .await
                    .is_ok()
            }
            SessionEvent::Listing(table) => {
                info!("active daemons:\n{table}");
                true
            }
        }
    }

    /// Push current local state after a (re)connection: changes made
    /// during an outage were never delivered.
    async fn reannounce(&mut self) -> bool {
        if self.shadow.is_none() {
            match self.clipboard.read().await {
                Ok((kind, data)) if !data.is_empty() => {
                    self.shadow = Some((kind, data));
                }
                Ok(_) => return true, // nothing to announce
                Err(e) => {
                    warn!("cannot read local clipboard: {e}");
                    return true;
                }
            }
        }

        let Some((kind, data)) = &self.shadow else {
            return true;
        };
        let value = ClipboardValue::from_bytes(*kind, data);
        self.outbound
            .send(WireMessage::clipboard_put("", &value))
            .await
            .is_ok()
    }
}
