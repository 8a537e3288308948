//! Background work deferred until after the response commits.
//!
//! A bounded in-process queue drained by a small worker pool. Overflow
//! drops the oldest task so audit bursts cannot grow memory without
//! bound; failures are logged and swallowed — they can never affect a
//! response that has already been sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::datahaven::{DataHavenClient, InferenceRecord};
use crate::memory::MemoryStore;
use crate::middleware::pii::PiiGuard;

pub enum Task {
    StoreMemory {
        text: String,
        doc_id: String,
        metadata: serde_json::Value,
    },
    AuditLog {
        record: InferenceRecord,
    },
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    queue: Mutex<VecDeque<Task>>,
    notify: Notify,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity,
            }),
        }
    }

    /// Enqueue a task, evicting the oldest entry when full.
    pub fn enqueue(&self, task: Task) {
        if let Ok(mut queue) = self.inner.queue.lock() {
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                tracing::warn!("background task queue full, dropping oldest task");
            }
            queue.push_back(task);
        }
        self.inner.notify.notify_one();
    }

    async fn pop(&self) -> Task {
        loop {
            if let Ok(mut queue) = self.inner.queue.lock() {
                if let Some(task) = queue.pop_front() {
                    return task;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.inner.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Start the worker pool draining this queue.
    pub fn spawn_workers(
        &self,
        workers: usize,
        memory: Arc<dyn MemoryStore>,
        datahaven: Arc<DataHavenClient>,
    ) {
        for _ in 0..workers {
            let queue = self.clone();
            let memory = memory.clone();
            let datahaven = datahaven.clone();
            tokio::spawn(async move {
                loop {
                    let task = queue.pop().await;
                    execute(task, &memory, &datahaven).await;
                }
            });
        }
    }
}

async fn execute(task: Task, memory: &Arc<dyn MemoryStore>, datahaven: &Arc<DataHavenClient>) {
    match task {
        Task::StoreMemory {
            text,
            doc_id,
            metadata,
        } => {
            memory.store(&text, &doc_id, metadata);
            tracing::debug!(doc_id = %doc_id, "memory snippet stored");
        }
        Task::AuditLog { record } => {
            if datahaven.log_inference(&record).await.is_none() {
                tracing::debug!(
                    request_id = %record.request_id,
                    "datahaven audit log skipped (service unavailable or no proof)"
                );
            }
        }
    }
}

/// Periodic reaper for PII map entries whose request never unmasked
/// (crashed task, dropped connection).
pub fn spawn_pii_sweep(guard: Arc<PiiGuard>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let reaped = guard.sweep(Duration::from_secs(600));
            if reaped > 0 {
                tracing::info!(reaped, "reaped orphaned PII redaction entries");
            }
        }
    });
}
