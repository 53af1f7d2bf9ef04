use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clipboard::ClipboardGuard;
use crate::error::Result;
use crate::process::Timeouts;
use crate::session::SessionController;
use crate::storage::{load_settings, save_settings, Settings};

pub struct AppState {
    /// The one vault session. Holding the lock serializes every CLI action.
    pub session: Mutex<SessionController>,
    pub clipboard: ClipboardGuard,
    pub settings: RwLock<Settings>,
    pub data_dir: PathBuf,

    /// Guard against overlapping background syncs.
    /// A trigger while one is running is dropped.
    pub sync_in_progress: AtomicBool,

    /// Time of the last user command, for auto-lock.
    last_activity: std::sync::Mutex<Instant>,
}

impl AppState {
    pub fn new(
        data_dir: PathBuf,
        settings: Settings,
        clipboard: ClipboardGuard,
        timeouts: Timeouts,
    ) -> Self {
        let session = SessionController::new(&settings.bw_path, &data_dir, timeouts);
        Self {
            session: Mutex::new(session),
            clipboard,
            settings: RwLock::new(settings),
            data_dir,
            sync_in_progress: AtomicBool::new(false),
            last_activity: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// State for `data_dir` with its saved settings and the system clipboard.
    pub fn load(data_dir: PathBuf) -> Self {
        let settings = load_settings(&data_dir);
        info!("Using bw at {} with data in {:?}", settings.bw_path, data_dir);
        Self::new(
            data_dir,
            settings,
            ClipboardGuard::system(),
            Timeouts::default(),
        )
    }

    /// Validate, persist and apply new settings.
    pub async fn update_settings(&self, settings: Settings) -> Result<Settings> {
        let saved = save_settings(&self.data_dir, &settings)?;
        let binary_changed = {
            let mut current = self.settings.write().await;
            let changed = current.bw_path != saved.bw_path;
            *current = saved.clone();
            changed
        };
        if binary_changed {
            info!("bw path changed to {}", saved.bw_path);
            self.session.lock().await.set_binary(&saved.bw_path);
        }
        Ok(saved)
    }

    // =========================================================================
    // Background sync
    // =========================================================================

    /// Start a sync in the background unless one is already running.
    ///
    /// Returns whether a sync was started.
    pub fn trigger_background_sync(self: &Arc<Self>) -> bool {
        if self.sync_in_progress.swap(true, Ordering::SeqCst) {
            debug!("Background sync already running, dropping trigger");
            return false;
        }

        let state = Arc::clone(self);
        tokio::spawn(async move {
            state.run_background_sync().await;
            state.sync_in_progress.store(false, Ordering::SeqCst);
        });
        true
    }

    /// The session lock is taken only to snapshot the token and to install
    /// the result; searches proceed while the CLI syncs.
    async fn run_background_sync(&self) {
        let job = match self.session.lock().await.begin_sync() {
            Ok(job) => job,
            Err(_) => {
                debug!("Vault no longer unlocked, skipping background sync");
                return;
            }
        };
        let synced = match job.run().await {
            Ok(synced) => synced,
            Err(e) => {
                warn!("Background sync failed: {}", e);
                return;
            }
        };
        let mut session = self.session.lock().await;
        if session.finish_sync(synced) {
            info!("Background sync finished with {} items", session.index().len());
        }
    }

    // =========================================================================
    // Auto-lock
    // =========================================================================

    pub fn touch(&self) {
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Lock the vault if it has been idle longer than the configured limit.
    ///
    /// Returns whether the vault was locked.
    pub async fn enforce_auto_lock(&self) -> bool {
        let Some(limit) = self.settings.read().await.auto_lock_after() else {
            return false;
        };
        if self.idle_for() < limit {
            return false;
        }

        let mut session = self.session.lock().await;
        if !session.is_unlocked() {
            return false;
        }
        info!("Idle for more than {:?}, locking vault", limit);
        if let Err(e) = session.lock().await {
            warn!("bw lock failed during auto-lock: {}", e);
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn set_idle_since(&self, at: Instant) {
        *self.last_activity.lock().unwrap() = at;
    }
}
