//! RabbitMQ-backed queue.
//!
//! Messages are pulled with `basic_get` and stay unacknowledged until
//! `delete`; the broker redelivers them if the channel closes first. The
//! channel runs in confirm mode, so `send` returns only once the broker has
//! taken the message.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use super::{MessageQueue, QueueError, QueueOptions, ReceivedMessage, Receipt};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Persistent delivery mode.
const DELIVERY_PERSISTENT: u8 = 2;

impl From<lapin::Error> for QueueError {
    fn from(e: lapin::Error) -> Self {
        QueueError::Backend(format!("AMQP: {}", e))
    }
}

/// Map a publisher confirm to the outcome of `send`.
fn confirmed(queue: &str, confirmation: Confirmation) -> Result<(), QueueError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(QueueError::Backend(format!(
            "AMQP: broker rejected message for {}",
            queue
        ))),
        Confirmation::NotRequested => Err(QueueError::Backend(format!(
            "AMQP: channel for {} is not in confirm mode",
            queue
        ))),
    }
}

pub struct AmqpQueue {
    name: String,
    channel: Channel,
    // Dropping the connection closes the channel.
    _connection: Connection,
    options: QueueOptions,
}

impl AmqpQueue {
    async fn connect(url: &str) -> Result<(Connection, Channel), QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok((connection, channel))
    }

    /// Declare a durable queue.
    pub async fn create(url: &str, name: &str) -> Result<(), QueueError> {
        let (_connection, channel) = Self::connect(url).await?;
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Open an existing queue. A passive declare fails if the queue is absent.
    pub async fn open(url: &str, name: &str, options: QueueOptions) -> Result<Self, QueueError> {
        let (connection, channel) = Self::connect(url).await?;
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                debug!("Passive declare of {} failed: {}", name, e);
                QueueError::Missing(name.to_string())
            })?;

        Ok(Self {
            name: name.to_string(),
            channel,
            _connection: connection,
            options,
        })
    }

    async fn get_one(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let message = self
            .channel
            .basic_get(&self.name, BasicGetOptions { no_ack: false })
            .await?;

        Ok(message.map(|m| ReceivedMessage {
            receipt: Receipt::DeliveryTag(m.delivery.delivery_tag),
            body: String::from_utf8_lossy(&m.delivery.data).into_owned(),
        }))
    }
}

#[async_trait]
impl MessageQueue for AmqpQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let confirmation = self
            .channel
            .basic_publish(
                "",
                &self.name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default().with_delivery_mode(DELIVERY_PERSISTENT),
            )
            .await?
            .await?;
        confirmed(&self.name, confirmation)
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + self.options.receive_wait;
        let mut received = Vec::new();

        while received.len() < max {
            match self.get_one().await? {
                Some(message) => received.push(message),
                None if !received.is_empty() => break,
                None => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        break;
                    }
                    tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
                }
            }
        }
        Ok(received)
    }

    async fn delete(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let Receipt::DeliveryTag(tag) = receipt else {
            return Err(QueueError::Backend(format!(
                "receipt {:?} does not belong to queue {}",
                receipt, self.name
            )));
        };
        self.channel
            .basic_ack(*tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let queue = self
            .channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.message_count() as u64)
    }
}
