//! Cooperative cancellation for batch runs.
//!
//! A [`ShutdownCoordinator`] is shared by the scheduler, the retrying client
//! and the Ctrl+C handler. Once requested, no new outlets are dispatched,
//! pending backoff sleeps end early and the progress file keeps every
//! result recorded so far.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register a global shutdown handle so subsystems can discover it lazily.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Retrieve the registered global shutdown handle, if available.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Coordinates cancellation across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Only the first request is recorded and broadcast.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            let reason = reason.into();
            info!(reason = %reason, "Cancellation requested; finishing in-flight outlets");
            *self.reason.lock() = Some(reason);
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Reason given by the first request
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request landing in between is not lost.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Spawn a task that requests shutdown on Ctrl+C
pub fn spawn_ctrl_c_handler(shutdown: SharedShutdown) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.request_shutdown("interrupted (Ctrl+C)"),
            Err(e) => warn!(error = %e, "Unable to listen for Ctrl+C"),
        }
    });
}
