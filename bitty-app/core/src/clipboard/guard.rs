use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Minimal clipboard access.
pub trait ClipboardBackend: Send + Sync {
    fn read_text(&self) -> Result<String, String>;
    fn write_text(&self, text: &str) -> Result<(), String>;
}

/// The system clipboard via `arboard`.
///
/// A fresh handle is opened per operation; on some platforms the handle
/// cannot be moved across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl ClipboardBackend for SystemClipboard {
    fn read_text(&self) -> Result<String, String> {
        let mut clipboard = arboard::Clipboard::new().map_err(|e| e.to_string())?;
        clipboard.get_text().map_err(|e| e.to_string())
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        let mut clipboard = arboard::Clipboard::new().map_err(|e| e.to_string())?;
        clipboard.set_text(text).map_err(|e| e.to_string())
    }
}

fn hash_content(content: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_vec()
}

/// Blank the clipboard if it still holds the content hashed as `expected`.
fn clear_if_unchanged(backend: &dyn ClipboardBackend, expected: &[u8]) {
    match backend.read_text() {
        Ok(current) if hash_content(&current) == expected => {
            if let Err(e) = backend.write_text("") {
                warn!("Failed to clear clipboard: {}", e);
            } else {
                debug!("Clipboard cleared");
            }
        }
        Ok(_) => debug!("Clipboard changed since copy, leaving it alone"),
        Err(e) => warn!("Failed to read clipboard before clearing: {}", e),
    }
}

struct PendingClear {
    task: JoinHandle<()>,
    /// Digest of the copied secret; the secret itself is not kept.
    expected: Vec<u8>,
}

/// Copies secrets to the clipboard and wipes them again after a delay.
///
/// Only one clear timer is ever pending: a new copy cancels the previous one.
/// The timer leaves the clipboard alone if its content changed in between.
pub struct ClipboardGuard {
    backend: Arc<dyn ClipboardBackend>,
    pending: Mutex<Option<PendingClear>>,
}

impl ClipboardGuard {
    pub fn new(backend: Arc<dyn ClipboardBackend>) -> Self {
        Self {
            backend,
            pending: Mutex::new(None),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClipboard))
    }

    /// Write `value` and schedule a clear after `clear_after` (zero: never).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn copy_secret(&self, value: &str, clear_after: Duration) -> Result<(), String> {
        // Held for the whole copy so concurrent callers cannot both leave a
        // timer behind
        let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.task.abort();
        }
        self.backend.write_text(value)?;

        if clear_after.is_zero() {
            return Ok(());
        }

        let expected = hash_content(value);
        let backend = self.backend.clone();
        let digest = expected.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(clear_after).await;
            clear_if_unchanged(backend.as_ref(), &digest);
        });
        *slot = Some(PendingClear { task, expected });
        Ok(())
    }

    /// Run the pending clear immediately instead of waiting for its timer.
    ///
    /// Called on shutdown, when the timer would die with the process.
    pub fn clear_now(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(pending) = pending {
            pending.task.abort();
            clear_if_unchanged(self.backend.as_ref(), &pending.expected);
        }
    }
}
