//! Tracks background tasks so they can be drained on shutdown.
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owns the `JoinHandle`s of every task spawned through it.
///
/// Shutdown waits for all tasks up to a deadline and aborts the rest.
#[derive(Clone, Debug, Default)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for all managed tasks to complete, for at most `timeout`.
    ///
    /// Returns `false` if the deadline passed and remaining tasks were aborted.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let handles = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect::<Vec<_>>();
        info!(
            "TaskManager shutting down. Waiting for {} tasks to complete...",
            handles.len()
        );

        let task_names: Vec<&'static str> = handles.iter().map(|(name, _)| *name).collect();
        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();
        debug!(tasks = ?task_names, "Awaiting all tasks.");

        let joined = join_all(handles.into_iter().map(|(_, handle)| handle));
        let results = match tokio::time::timeout(timeout, joined).await {
            Ok(results) => results,
            Err(_) => {
                let pending = aborts.iter().filter(|a| !a.is_finished()).count();
                warn!(pending, ?timeout, "Shutdown deadline passed, aborting tasks.");
                for abort in aborts {
                    abort.abort();
                }
                return false;
            }
        };

        let mut panics = 0;
        for (task_name, result) in task_names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task shut down gracefully."),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked during shutdown.");
                    panics += 1;
                }
            }
        }

        if panics > 0 {
            error!("{} tasks panicked during shutdown.", panics);
        } else {
            info!("All tasks shut down gracefully.");
        }
        true
    }
}
