//! Progress monitor
//!
//! Cancellation and error reporting channel between callers and the
//! connection wrapper.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConnectionError;

/// Observes and cancels in-flight directory operations.
///
/// Clones share state; cancelling one clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct StudioProgressMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug, Default)]
struct MonitorInner {
    token: CancellationToken,
    task_name: Mutex<String>,
    errors: Mutex<Vec<String>>,
}

impl StudioProgressMonitor {
    /// Create a monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a monitor for a named task.
    pub fn with_task_name(name: impl Into<String>) -> Self {
        let monitor = Self::new();
        *monitor.inner.task_name.lock() = name.into();
        monitor
    }

    /// Current task name.
    pub fn task_name(&self) -> String {
        self.inner.task_name.lock().clone()
    }

    /// Rename the current task.
    pub fn set_task_name(&self, name: impl Into<String>) {
        *self.inner.task_name.lock() = name.into();
    }

    /// Request cancellation.
    pub fn set_cancelled(&self) {
        self.inner.token.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Record an error for the caller.
    pub fn report_error(&self, error: &ConnectionError) {
        debug!(
            task = %self.task_name(),
            code = error.error_code(),
            error = %error,
            "Operation error reported"
        );
        self.inner.errors.lock().push(error.to_string());
    }

    /// Record an error message for the caller.
    pub fn report_error_message(&self, message: impl Into<String>) {
        self.inner.errors.lock().push(message.into());
    }

    /// Whether any error was reported.
    pub fn errors_reported(&self) -> bool {
        !self.inner.errors.lock().is_empty()
    }

    /// Reported error messages, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.lock().clone()
    }
}
