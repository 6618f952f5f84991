//! In-process queue for tests and single-process runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{MessageQueue, QueueError, ReceivedMessage, Receipt};

struct Entry {
    id: u64,
    body: String,
    visible_at: Instant,
}

/// Queue held in memory. `receive` never waits.
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    entries: Mutex<VecDeque<Entry>>,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self::with_visibility_timeout(name, Duration::from_secs(300))
    }

    pub fn with_visibility_timeout(name: &str, visibility_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            visibility_timeout,
            entries: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bodies of every held message, visible or not, oldest first.
    pub async fn bodies(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.body.clone())
            .collect()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().await.push_back(Entry {
            id,
            body: body.to_string(),
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let mut received = Vec::new();
        for entry in entries.iter_mut() {
            if received.len() >= max {
                break;
            }
            if entry.visible_at <= now {
                entry.visible_at = now + self.visibility_timeout;
                received.push(ReceivedMessage {
                    receipt: Receipt::Memory(entry.id),
                    body: entry.body.clone(),
                });
            }
        }
        Ok(received)
    }

    async fn delete(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let Receipt::Memory(id) = receipt else {
            return Err(QueueError::Backend(format!(
                "receipt {:?} does not belong to queue {}",
                receipt, self.name
            )));
        };
        self.entries.lock().await.retain(|e| e.id != *id);
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.entries.lock().await.len() as u64)
    }
}
