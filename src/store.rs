//! The universal clipboard: a single shared value slot.
//!
//! The hub owns exactly one of these. Last write wins; a write that is
//! byte-identical to the current value is reported as unchanged so the
//! hub can skip the broadcast. Accepted writes are appended to a
//! date-keyed change log for audit purposes. The sync logic never
//! reads the log back.

use crate::protocol::ClipboardKind;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Errors from the clipboard store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Change-log IO failed
    #[error("change log IO: {0}")]
    Log(#[from] std::io::Error),
}

/// The single-slot universal clipboard value.
pub struct UniversalClipboard {
    slot: Mutex<Slot>,
    /// Root of the change-log tree; `None` disables logging.
    log_dir: Option<PathBuf>,
}

struct Slot {
    kind: ClipboardKind,
    buf: Vec<u8>,
}

/// One change-log line.
#[derive(Serialize)]
struct LogEntry<'a> {
    time: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: ClipboardKind,
    data: &'a str,
}

impl UniversalClipboard {
    /// Create an empty store. `log_dir` is the data directory under
    /// which `logs/clipboard/<year>/<month>/<day>.log` files are
    /// appended; pass `None` to disable the change log.
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                kind: ClipboardKind::Text,
                buf: Vec::new(),
            }),
            log_dir,
        }
    }

    /// Current value as a defensive copy.
    pub fn read(&self) -> (ClipboardKind, Vec<u8>) {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        (slot.kind, slot.buf.clone())
    }

    /// Current payload, copied only if the stored kind matches.
    pub fn read_as(&self, kind: ClipboardKind) -> Option<Vec<u8>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.kind != kind {
            return None;
        }
        Some(slot.buf.clone())
    }

    /// Replace the value. Returns `false` without side effects when
    /// `(kind, buf)` is byte-identical to the current value.
    ///
    /// The change-log append happens after the slot lock is released:
    /// correctness does not depend on log durability, so the write is
    /// best-effort and must not extend the critical section.
    pub fn write(&self, kind: ClipboardKind, buf: Vec<u8>) -> bool {
        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            if slot.kind == kind && slot.buf == buf {
                return false;
            }
            slot.kind = kind;
            slot.buf = buf.clone();
        }

        if let Err(e) = self.append_log(kind, &buf) {
            warn!("cannot persist clipboard change: {e}");
        }
        true
    }

    fn append_log(&self, kind: ClipboardKind, buf: &[u8]) -> Result<(), StoreError> {
        let Some(root) = &self.log_dir else {
            return Ok(());
        };

        // Binary payloads are logged as their type tag only.
        let printable = match kind {
            ClipboardKind::Text => String::from_utf8_lossy(buf).into_owned(),
            ClipboardKind::ImagePng => kind.to_string(),
        };

        let now = Utc::now();
        let entry = LogEntry {
            time: now,
            kind,
            data: &printable,
        };

        let dir = root
            .join("logs")
            .join("clipboard")
            .join(now.year().to_string())
            .join(now.month().to_string());
        fs::create_dir_all(&dir)?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", now.day())))?;
        let mut line = serde_json::to_vec(&entry).unwrap_or_default();
        line.push(b'\n');
        f.write_all(&line)?;
        Ok(())
    }
}
