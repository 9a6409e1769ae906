//! Background queue feeding the index advisor
//!
//! Capture ids go into a bounded channel drained by a fixed number of worker
//! tasks. Each worker analyzes one capture at a time, so at most `workers`
//! statements are being inspected concurrently. Enqueueing never waits: a
//! full queue drops the id with a warning.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::advisor::IndexAdvisor;
use crate::AdvisorError;

/// Handle to the advisor worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct AdvisorQueue {
    sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AdvisorQueue {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn start(advisor: Arc<IndexAdvisor>) -> Self {
        let capacity = advisor.config().queue_capacity.max(1);
        let worker_count = advisor.config().workers.max(1);

        let (sender, receiver) = mpsc::channel::<String>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker| {
                let receiver = receiver.clone();
                let advisor = advisor.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(id) = next else {
                            break;
                        };
                        run_one(worker, advisor.clone(), id).await;
                    }
                    debug!("Advisor worker {} stopped", worker);
                })
            })
            .collect();

        info!(
            "Index advisor started ({} workers, queue capacity {})",
            worker_count, capacity
        );

        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Queue a capture for analysis without waiting.
    pub fn enqueue(&self, id: impl Into<String>) -> Result<(), AdvisorError> {
        let id = id.into();
        let Ok(sender) = self.sender.lock() else {
            return Err(AdvisorError::QueueClosed);
        };
        let Some(sender) = sender.as_ref() else {
            return Err(AdvisorError::QueueClosed);
        };

        match sender.try_send(id) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(id)) => {
                warn!("Advisor queue full, dropping capture {}", id);
                Err(AdvisorError::QueueFull(id))
            }
            Err(TrySendError::Closed(_)) => Err(AdvisorError::QueueClosed),
        }
    }

    /// Stop accepting work, let the workers drain the queue and wait for them.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };

        for worker in workers {
            if let Err(e) = worker.await {
                error!("Advisor worker ended abnormally: {}", e);
            }
        }

        info!("Index advisor stopped");
    }
}

/// Analyze one capture in its own task so a panic stays contained.
async fn run_one(worker: usize, advisor: Arc<IndexAdvisor>, id: String) {
    let task_id = id.clone();
    let result = tokio::spawn(async move { advisor.analyze_capture(&task_id).await }).await;

    match result {
        Ok(Ok(suggestions)) => debug!(
            "Worker {} analyzed capture {}: {} suggestion(s)",
            worker,
            id,
            suggestions.len()
        ),
        Ok(Err(e)) => warn!("Worker {} failed to analyze capture {}: {}", worker, id, e),
        Err(e) => error!("Worker {} panicked on capture {}: {}", worker, id, e),
    }
}
