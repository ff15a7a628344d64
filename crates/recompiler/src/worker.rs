//! Background compile worker.
//!
//! A single named thread draining compile tasks from an mpsc channel
//! through a caller-supplied handler. Submission never blocks. Dropping
//! the worker closes the channel and joins the thread, so every submitted
//! task is handled before the drop returns.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use lyra_training::CompileTask;
use tracing::warn;

/// Handle to the background compile worker thread.
pub struct CompileWorker {
    sender: Option<mpsc::Sender<Arc<CompileTask>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CompileWorker {
    /// Start the worker. `handler` runs on the worker thread for each
    /// submitted task; it owns the task's started/finished stamping.
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(Arc<CompileTask>) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Arc<CompileTask>>();

        #[expect(clippy::expect_used, reason = "thread spawn failure is unrecoverable")]
        let handle = thread::Builder::new()
            .name("compile-worker".to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    handler(task);
                }
                // Channel closed: clean exit.
            })
            .expect("failed to spawn compile worker thread");

        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Submit a task. Returns `false` if the worker is gone (channel
    /// disconnected); the caller falls back to synchronous handling.
    pub fn submit(&self, task: Arc<CompileTask>) -> bool {
        self.sender
            .as_ref()
            .map(|s| s.send(task).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for CompileWorker {
    fn drop(&mut self) {
        // Close the channel first so the worker's recv() returns Err.
        drop(self.sender.take());
        if let Some(handle) = self.handle.take()
            && let Err(panic_payload) = handle.join()
        {
            // Don't re-panic during drop; a double panic aborts.
            warn!(
                payload = ?panic_payload.downcast_ref::<&str>(),
                "compile worker thread panicked"
            );
        }
    }
}

impl std::fmt::Debug for CompileWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileWorker")
            .field("active", &self.sender.is_some())
            .finish()
    }
}
