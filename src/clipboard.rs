//! OS clipboard capability boundary.
//!
//! The sync core never touches a platform clipboard directly; it
//! depends on [`LocalClipboard`], a read/write/watch capability. The
//! `arboard`-backed provider is the production implementation and the
//! in-memory provider is the deterministic double used by tests.

use crate::protocol::ClipboardKind;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Clipboard capability errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform backend failure
    #[error("clipboard backend: {0}")]
    Backend(String),

    /// Content kind the backend cannot represent
    #[error("unsupported content kind: {0}")]
    Unsupported(ClipboardKind),
}

/// Read/write/watch capability over one machine's clipboard.
///
/// `watch` yields an infinite stream of `(kind, bytes)` change events;
/// the stream is not restartable and ends only when the provider is
/// dropped.
#[async_trait]
pub trait LocalClipboard: Send + Sync {
    /// Current clipboard content.
    async fn read(&self) -> Result<(ClipboardKind, Vec<u8>), ClipboardError>;

    /// Replace the clipboard content. Returns `true` if the content
    /// actually changed.
    async fn write(&self, kind: ClipboardKind, data: &[u8]) -> Result<bool, ClipboardError>;

    /// Subscribe to clipboard change events.
    async fn watch(&self) -> Result<mpsc::Receiver<(ClipboardKind, Vec<u8>)>, ClipboardError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Production provider backed by the `arboard` crate.
///
/// Text only: `arboard` exposes images as raw RGBA, and re-encoding
/// PNG is out of scope for this provider. Image values arriving from
/// the hub are reported as unsupported and skipped by the sync loop.
pub struct ArboardClipboard {
    poll_interval: Duration,
}

impl ArboardClipboard {
    /// Create a provider polling the OS clipboard at `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn read_text() -> Result<Vec<u8>, ClipboardError> {
        let mut cb =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
        match cb.get_text() {
            Ok(text) => Ok(text.into_bytes()),
            // an empty or non-text clipboard is not an error
            Err(arboard::Error::ContentNotAvailable) => Ok(Vec::new()),
            Err(e) => Err(ClipboardError::Backend(e.to_string())),
        }
    }
}

#[async_trait]
impl LocalClipboard for ArboardClipboard {
    async fn read(&self) -> Result<(ClipboardKind, Vec<u8>), ClipboardError> {
        let buf = tokio::task::spawn_blocking(Self::read_text)
            .await
            .map_err(|e| ClipboardError::Backend(e.to_string()))??;
        Ok((ClipboardKind::Text, buf))
    }

    async fn write(&self, kind: ClipboardKind, data: &[u8]) -> Result<bool, ClipboardError> {
        if kind != ClipboardKind::Text {
            return Err(ClipboardError::Unsupported(kind));
        }
        let text = String::from_utf8_lossy(data).into_owned();
        tokio::task::spawn_blocking(move || {
            let current = Self::read_text()?;
            if current == text.as_bytes() {
                return Ok(false);
            }
            let mut cb =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            cb.set_text(text)
                .map_err(|e| ClipboardError::Backend(e.to_string()))?;
            Ok(true)
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))?
    }

    async fn watch(&self) -> Result<mpsc::Receiver<(ClipboardKind, Vec<u8>)>, ClipboardError> {
        let (tx, rx) = mpsc::channel(16);
        let interval = self.poll_interval;

        tokio::spawn(async move {
            let mut last: Option<Vec<u8>> = None;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let buf = match tokio::task::spawn_blocking(Self::read_text).await {
                    Ok(Ok(buf)) => buf,
                    Ok(Err(e)) => {
                        warn!("clipboard poll failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        warn!("clipboard poll task failed: {e}");
                        continue;
                    }
                };
                if buf.is_empty() || last.as_deref() == Some(&buf[..]) {
                    continue;
                }
                last = Some(buf.clone());
                if tx.send((ClipboardKind::Text, buf)).await.is_err() {
                    debug!("clipboard watch subscriber gone, stopping poll");
                    return;
                }
            }
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "arboard"
    }
}

/// In-memory provider for tests and headless use.
///
/// [`MemoryClipboard::copy`] simulates a user copying new content;
/// like a real OS watcher, subscribers observe writes from the sync
/// loop itself as well, which is exactly what the loop-prevention
/// shadow has to cope with.
#[derive(Clone)]
pub struct MemoryClipboard {
    inner: Arc<Mutex<(ClipboardKind, Vec<u8>)>>,
    events: broadcast::Sender<(ClipboardKind, Vec<u8>)>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new((ClipboardKind::Text, Vec::new()))),
            events,
        }
    }

    /// Simulate a user copy: set the content and notify watchers.
    pub fn copy(&self, kind: ClipboardKind, data: Vec<u8>) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            *inner = (kind, data.clone());
        }
        let _ = self.events.send((kind, data));
    }
}

impl Default for MemoryClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalClipboard for MemoryClipboard {
    async fn read(&self) -> Result<(ClipboardKind, Vec<u8>), ClipboardError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.clone())
    }

    async fn write(&self, kind: ClipboardKind, data: &[u8]) -> Result<bool, ClipboardError> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.0 == kind && inner.1 == data {
                return Ok(false);
            }
            *inner = (kind, data.to_vec());
        }
        // the OS watcher sees our own writes too
        let _ = self.events.send((kind, data.to_vec()));
        Ok(true)
    }

    async fn watch(&self) -> Result<mpsc::Receiver<(ClipboardKind, Vec<u8>)>, ClipboardError> {
        let (tx, rx) = mpsc::channel(64);
        let mut events = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("clipboard watch lagged, {n} events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(rx)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_memory_read_write() {
        let cb = MemoryClipboard::new();
        assert!(cb.write(ClipboardKind::Text, b"hi").await.unwrap());
        assert!(!cb.write(ClipboardKind::Text, b"hi").await.unwrap());

        let (kind, buf) = cb.read().await.unwrap();
        assert_eq!(kind, ClipboardKind::Text);
        assert_eq!(buf, b"hi");
    }

    #[tokio::test]
    async fn test_memory_watch_sees_copies_and_writes() {
        let cb = MemoryClipboard::new();
        let mut rx = cb.watch().await.unwrap();

        cb.copy(ClipboardKind::Text, b"user copy".to_vec());
        assert_eq!(
            rx.recv().await.unwrap(),
            (ClipboardKind::Text, b"user copy".to_vec())
        );

        cb.write(ClipboardKind::Text, b"sync write").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            (ClipboardKind::Text, b"sync write".to_vec())
        );
    }
}
