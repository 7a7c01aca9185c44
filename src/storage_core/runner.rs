//! The per-core single-producer single-consumer control-plane FIFO.

use crate::error::{CoreError, Result};
use std::future::Future;
use std::pin::Pin;

type ControlTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Serializes control-plane work (checkpoint creation, meta flush, transfer
/// orchestration) onto one worker so these actions never interleave with
/// each other, per core.
pub struct TaskRunner {
    sender: tokio::sync::mpsc::Sender<ControlTask>,
    worker: tokio::task::JoinHandle<()>,
}

impl TaskRunner {
    pub fn new(queue_capacity: usize) -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::channel::<ControlTask>(queue_capacity);
        let worker = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                task.await;
            }
        });
        Self { sender, worker }
    }

    /// Enqueues `task`, failing immediately (never blocking) if the queue
    /// is full.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .try_send(Box::pin(task))
            .map_err(|_| CoreError::Transfer("control-plane runner queue is full".to_string()))
    }

    /// Stops accepting new work and waits for the worker to drain and exit.
    /// Idempotent-ish: calling after an earlier `shutdown` just awaits an
    /// already-finished handle.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}
