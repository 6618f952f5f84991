//! Message queue abstraction for the work and results queues.
//!
//! Delivery is at-least-once with no ordering guarantee: a received message
//! stays hidden for the visibility timeout and reappears unless the consumer
//! deletes it. Consumers must tolerate duplicates.

mod db;
mod memory;

#[cfg(feature = "amqp-broker")]
mod amqp;

pub use db::DbQueue;
pub use memory::MemoryQueue;

#[cfg(feature = "amqp-broker")]
pub use amqp::AmqpQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::Settings;
use crate::repository::{DbContext, DbError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue {0} does not exist. Please create it (filingtext init)")]
    Missing(String),
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

/// Opaque handle used to delete a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Row ID in `queue_messages`.
    Db(String),
    /// Sequence number in an in-process queue.
    Memory(u64),
    /// AMQP delivery tag.
    DeliveryTag(u64),
}

/// A message handed to a consumer. It must be deleted via its receipt.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub receipt: Receipt,
    pub body: String,
}

impl ReceivedMessage {
    /// Decode the JSON body.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Timing behaviour shared by the polling backends.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// How long `receive` waits for a message before returning empty.
    pub receive_wait: Duration,
    /// How long a received message stays hidden from other consumers.
    pub visibility_timeout: Duration,
    /// Messages older than this are discarded unread.
    pub retention: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            receive_wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(4 * 24 * 3600),
        }
    }
}

/// A named queue with explicit per-message acknowledgement.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue a message body.
    async fn send(&self, body: &str) -> Result<(), QueueError>;

    /// Receive up to `max` messages, waiting up to the backend's receive
    /// timeout. An empty vector means the wait elapsed with nothing to read.
    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge (permanently remove) a received message.
    async fn delete(&self, receipt: &Receipt) -> Result<(), QueueError>;

    /// Approximate number of messages held, visible or not.
    async fn depth(&self) -> Result<u64, QueueError>;
}

/// Serialize a record as JSON and send it.
pub async fn send_json<T: Serialize + Sync>(
    queue: &dyn MessageQueue,
    message: &T,
) -> Result<(), QueueError> {
    let body = serde_json::to_string(message)?;
    queue.send(&body).await
}

/// Which backend carries the queues, derived from `broker_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerKind {
    /// Queues stored in the document database.
    Database,
    /// RabbitMQ (or any AMQP 0.9.1 broker).
    Amqp(String),
}

impl BrokerKind {
    pub fn from_url(broker_url: Option<&str>) -> Result<Self, QueueError> {
        match broker_url {
            None | Some("") | Some("db") | Some("database") => Ok(BrokerKind::Database),
            Some(url) if url.starts_with("amqp://") || url.starts_with("amqps://") => {
                Ok(BrokerKind::Amqp(url.to_string()))
            }
            Some(other) => Err(QueueError::Connection(format!(
                "unsupported broker URL: {}",
                other
            ))),
        }
    }
}

/// Open an existing queue. A queue that was never created is an error.
pub async fn open_queue(
    broker: &BrokerKind,
    db: &DbContext,
    name: &str,
    options: QueueOptions,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    match broker {
        BrokerKind::Database => Ok(Arc::new(
            DbQueue::open(db.pool().clone(), name, options).await?,
        )),
        BrokerKind::Amqp(url) => open_amqp(url, name, options).await,
    }
}

/// Create a queue if it does not exist yet.
pub async fn create_queue(broker: &BrokerKind, db: &DbContext, name: &str) -> Result<(), QueueError> {
    match broker {
        BrokerKind::Database => DbQueue::create(db.pool(), name).await,
        BrokerKind::Amqp(url) => create_amqp(url, name).await,
    }
}

/// The work and results queues named by the settings.
#[derive(Clone)]
pub struct QueueSet {
    broker: BrokerKind,
    db: DbContext,
    options: QueueOptions,
    work_name: String,
    results_name: String,
}

impl QueueSet {
    /// Resolve the broker for a command. Queues are opened lazily so a
    /// command only fails on the queues it actually uses.
    pub fn open(settings: &Settings, db: &DbContext) -> Result<Self, QueueError> {
        Ok(Self {
            broker: BrokerKind::from_url(settings.broker_url.as_deref())?,
            db: db.clone(),
            options: settings.queue_options(),
            work_name: settings.work_queue.clone(),
            results_name: settings.results_queue.clone(),
        })
    }

    pub fn broker(&self) -> &BrokerKind {
        &self.broker
    }

    pub async fn work(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
        open_queue(&self.broker, &self.db, &self.work_name, self.options).await
    }

    pub async fn results(&self) -> Result<Arc<dyn MessageQueue>, QueueError> {
        open_queue(&self.broker, &self.db, &self.results_name, self.options).await
    }

    /// Create both queues if missing.
    pub async fn create_all(&self) -> Result<(), QueueError> {
        create_queue(&self.broker, &self.db, &self.work_name).await?;
        create_queue(&self.broker, &self.db, &self.results_name).await
    }
}

#[cfg(feature = "amqp-broker")]
async fn open_amqp(
    url: &str,
    name: &str,
    options: QueueOptions,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    Ok(Arc::new(AmqpQueue::open(url, name, options).await?))
}

#[cfg(not(feature = "amqp-broker"))]
async fn open_amqp(
    _url: &str,
    _name: &str,
    _options: QueueOptions,
) -> Result<Arc<dyn MessageQueue>, QueueError> {
    Err(amqp_disabled())
}

#[cfg(feature = "amqp-broker")]
async fn create_amqp(url: &str, name: &str) -> Result<(), QueueError> {
    AmqpQueue::create(url, name).await
}

#[cfg(not(feature = "amqp-broker"))]
async fn create_amqp(_url: &str, _name: &str) -> Result<(), QueueError> {
    Err(amqp_disabled())
}

#[cfg(not(feature = "amqp-broker"))]
fn amqp_disabled() -> QueueError {
    QueueError::Connection(
        "AMQP broker URL given but filingtext was built without the `amqp-broker` feature"
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_kind_from_url() {
        assert_eq!(BrokerKind::from_url(None).unwrap(), BrokerKind::Database);
        assert_eq!(
            BrokerKind::from_url(Some("database")).unwrap(),
            BrokerKind::Database
        );
        assert_eq!(
            BrokerKind::from_url(Some("amqp://guest@localhost")).unwrap(),
            BrokerKind::Amqp("amqp://guest@localhost".to_string())
        );
        assert!(BrokerKind::from_url(Some("redis://localhost")).is_err());
    }

    #[tokio::test]
    async fn test_queue_set_requires_created_queues() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings::with_data_dir(dir.path().to_path_buf());
        let db = DbContext::new(&settings.database_path());
        db.init_schema().await.unwrap();

        let queues = QueueSet::open(&settings, &db).unwrap();
        assert!(matches!(queues.work().await, Err(QueueError::Missing(_))));

        queues.create_all().await.unwrap();
        queues.create_all().await.unwrap();
        assert_eq!(queues.work().await.unwrap().name(), settings.work_queue);
        assert_eq!(queues.results().await.unwrap().name(), settings.results_queue);
    }

    #[tokio::test]
    async fn test_send_json_round_trip() {
        use crate::models::WorkMessage;

        let queue = MemoryQueue::new("work");
        let work = WorkMessage {
            filing_doc_id: 1,
            external_num: "6017".to_string(),
            source_url: "http://x/6017.pdf".to_string(),
        };
        send_json(&queue, &work).await.unwrap();

        let received = queue.receive(1).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].parse::<WorkMessage>().unwrap(), work);
    }
}
