//! Callback listeners on top of broadcast channels
//!
//! Each listener drains its own receiver on its own task, so a slow
//! callback only delays itself. A panicking callback is logged and the
//! listener keeps receiving.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Handle returned by `subscribe_fn`; dropping it keeps the listener alive,
/// calling `unsubscribe` stops it.
#[derive(Debug)]
pub struct ListenerHandle {
    name: String,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop delivering events to this listener
    pub fn unsubscribe(self) {
        debug!("Listener {} unsubscribed", self.name);
        self.task.abort();
    }

    /// True once the listener task has stopped (unsubscribed or source closed)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task feeding every event from `rx` into `callback`
pub(crate) fn spawn_listener<T, F>(
    name: impl Into<String>,
    mut rx: broadcast::Receiver<T>,
    mut callback: F,
) -> ListenerHandle
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let name = name.into();
    let task_name = name.clone();

    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                        error!("Listener {} panicked: {}", task_name, panic_message(&*panic));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Listener {} lagged, {} events dropped", task_name, skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Listener {} source closed", task_name);
                    break;
                }
            }
        }
    });

    ListenerHandle { name, task }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
