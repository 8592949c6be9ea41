//! Deferred work collaborator.

use std::time::Duration;
use tokio::runtime::Handle;

/// A deferred action.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Runs actions at or after a delay.
///
/// The host database uses it to arm the periodic hosts file check and the
/// expiry sweep. Actions may block on file I/O, so implementations must not
/// run them on a thread that drives other async work.
pub trait Schedule: Send + Sync {
    fn after(&self, delay: Duration, action: Action);
}

/// [`Schedule`] backed by the ambient tokio runtime.
///
/// Sleeps on the async timer, then runs the action on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Schedule for TokioScheduler {
    fn after(&self, delay: Duration, action: Action) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(?delay, "no tokio runtime, dropping scheduled action");
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(action).await {
                tracing::warn!(error = %e, "scheduled action panicked");
            }
        });
    }
}
