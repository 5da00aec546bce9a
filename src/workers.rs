//! Fire-and-forget background tasks with a shared status queue.
//!
//! [`TaskRunner::run_detached`] starts a task on its own thread and returns
//! immediately. When the task finishes, a [`TaskStatus`] is pushed onto a
//! FIFO channel shared by all tasks of the runner; that channel is the only
//! synchronization between tasks and their owner. Tasks cannot be
//! cancelled and have no timeout: each runs until it returns or the
//! process exits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::error::LauncherError;
use crate::launcher::Launcher;

/// Exit code recorded when a task panics or cannot be started.
pub const CODE_ABORTED: i32 = -1;

/// Completion record published by a background task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub operation: String,
    pub subject: String,
    /// 0 on success; otherwise the task's failure code.
    pub code: i32,
    pub finished_at: DateTime<Utc>,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

pub struct TaskRunner {
    tx: UnboundedSender<TaskStatus>,
    rx: UnboundedReceiver<TaskStatus>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx }
    }

    /// Runs `task` on a new thread. Its return value becomes the status
    /// code; a panic is recorded as [`CODE_ABORTED`].
    pub fn run_detached<F>(&self, operation: &str, subject: &str, task: F)
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let tx = self.tx.clone();
        let operation = operation.to_string();
        let subject = subject.to_string();
        let thread_name = format!("{}:{}", operation, subject);
        let (op, subj) = (operation.clone(), subject.clone());

        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let code = catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
                    warn!(operation = %op, subject = %subj, "background task panicked");
                    CODE_ABORTED
                });
                publish(&tx, op, subj, code);
            });

        if let Err(e) = spawned {
            warn!(operation = %operation, subject = %subject, error = %e, "could not start background task");
            publish(&self.tx, operation, subject, CODE_ABORTED);
        }
    }

    /// Next finished task, if one is waiting.
    pub fn try_next(&mut self) -> Option<TaskStatus> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next task to finish.
    pub async fn next(&mut self) -> Option<TaskStatus> {
        self.rx.recv().await
    }

    /// All statuses published so far, oldest first.
    pub fn drain(&mut self) -> Vec<TaskStatus> {
        let mut out = Vec::new();
        while let Ok(status) = self.rx.try_recv() {
            out.push(status);
        }
        out
    }
}

fn publish(tx: &UnboundedSender<TaskStatus>, operation: String, subject: String, code: i32) {
    debug!(operation = %operation, subject = %subject, code, "background task finished");
    // The receiver lives as long as the runner; a send error means nobody
    // is listening any more.
    let _ = tx.send(TaskStatus {
        operation,
        subject,
        code,
        finished_at: Utc::now(),
    });
}

/// Pulls `reference` through the launcher in the background. Publishes
/// `download_model` with the launcher's exit code.
pub fn download_model(runner: &TaskRunner, launcher: Arc<Launcher>, reference: &str) {
    let model = reference.to_string();
    runner.run_detached("download_model", reference, move || {
        match launcher.run_blocking(&["pull", &model]) {
            Ok(_) => 0,
            Err(LauncherError::Failed { code, .. }) => code.unwrap_or(CODE_ABORTED),
            Err(e) => {
                warn!(model = %model, error = %e, "model download failed");
                CODE_ABORTED
            }
        }
    });
}
