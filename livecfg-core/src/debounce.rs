//! Reset-style debounce timer
//!
//! At most one task is pending at a time. Scheduling again cancels the
//! pending task and restarts the window, so only the last task runs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct DebounceState {
    generation: u64,
    pending: Option<CancellationToken>,
}

/// Single-slot debounce timer driven by the ambient tokio runtime
#[derive(Debug, Default)]
pub struct Debouncer {
    state: Arc<Mutex<DebounceState>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `window` elapses without another `schedule` or `cancel`
    ///
    /// Outside a tokio runtime there is no timer to wait on; the task runs
    /// immediately on the calling thread.
    pub fn schedule<F>(&self, window: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime; running debounced task immediately");
                self.cancel();
                task();
                return;
            }
        };

        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.pending.take() {
                previous.cancel();
            }
            state.generation += 1;
            state.pending = Some(token.clone());
            state.generation
        };

        let state = Arc::clone(&self.state);
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }

            {
                let mut guard = state.lock();
                if guard.generation != generation || guard.pending.is_none() {
                    return;
                }
                guard.pending = None;
            }

            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!("Debounced task failed to complete: {}", e);
            }
        });
    }

    /// Cancel the pending task, if any
    ///
    /// Returns true if a task was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        match state.pending.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}
