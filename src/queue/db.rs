//! Queue backed by the `queues` / `queue_messages` tables.
//!
//! A receive is a single `UPDATE ... RETURNING` that pushes `visible_at`
//! forward by the visibility timeout, so concurrent consumers never see the
//! same message until that timeout lapses.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;
use tracing::debug;
use uuid::Uuid;

use super::{MessageQueue, QueueError, QueueOptions, ReceivedMessage, Receipt};
use crate::repository::models::{ClaimedMessageRow, NewQueueMessage};
use crate::repository::util::{format_timestamp, now_timestamp};
use crate::repository::DbPool;
use crate::schema::{queue_messages, queues};
use crate::{with_conn, with_conn_split};

/// Longest sleep between polls while waiting for a message.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct DbQueue {
    pool: DbPool,
    name: String,
    options: QueueOptions,
}

impl DbQueue {
    /// Register a queue name. Creating an existing queue is a no-op.
    pub async fn create(pool: &DbPool, name: &str) -> Result<(), QueueError> {
        let now = now_timestamp();
        with_conn_split!(pool,
            sqlite: conn => {
                diesel::insert_or_ignore_into(queues::table)
                    .values((queues::name.eq(name), queues::created_at.eq(&now)))
                    .execute(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::insert_into(queues::table)
                    .values((queues::name.eq(name), queues::created_at.eq(&now)))
                    .on_conflict_do_nothing()
                    .execute(&mut conn)
                    .await?
            }
        );
        Ok(())
    }

    /// Open a registered queue.
    pub async fn open(pool: DbPool, name: &str, options: QueueOptions) -> Result<Self, QueueError> {
        let found: Option<String> = with_conn!(pool, conn => {
            queues::table
                .find(name)
                .select(queues::name)
                .first(&mut conn)
                .await
                .optional()?
        });
        if found.is_none() {
            return Err(QueueError::Missing(name.to_string()));
        }

        Ok(Self {
            pool,
            name: name.to_string(),
            options,
        })
    }

    /// Drop messages older than the retention period.
    async fn purge_expired(&self) -> Result<usize, QueueError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.options.retention)
                .unwrap_or_else(|_| chrono::Duration::days(4));
        let cutoff = format_timestamp(cutoff);

        let purged = with_conn!(self.pool, conn => {
            diesel::delete(
                queue_messages::table
                    .filter(queue_messages::queue_name.eq(&self.name))
                    .filter(queue_messages::created_at.lt(&cutoff)),
            )
            .execute(&mut conn)
            .await?
        });
        if purged > 0 {
            debug!("Purged {} expired messages from {}", purged, self.name);
        }
        Ok(purged)
    }

    /// Claim up to `max` visible messages, hiding them for the visibility timeout.
    async fn claim(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let now = Utc::now();
        let hidden_until = now
            + chrono::Duration::from_std(self.options.visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = format_timestamp(now);
        let hidden_until = format_timestamp(hidden_until);
        let max = max as i64;

        let rows: Vec<ClaimedMessageRow> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(
                    "UPDATE queue_messages SET visible_at = ?, receive_count = receive_count + 1 \
                     WHERE id IN ( \
                         SELECT id FROM queue_messages \
                         WHERE queue_name = ? AND visible_at <= ? \
                         ORDER BY created_at LIMIT ?) \
                     RETURNING id, body",
                )
                .bind::<Text, _>(&hidden_until)
                .bind::<Text, _>(&self.name)
                .bind::<Text, _>(&now)
                .bind::<BigInt, _>(max)
                .load(&mut conn)
                .await?
            },
            postgres: conn => {
                diesel::sql_query(
                    "UPDATE queue_messages SET visible_at = $1, receive_count = receive_count + 1 \
                     WHERE id IN ( \
                         SELECT id FROM queue_messages \
                         WHERE queue_name = $2 AND visible_at <= $3 \
                         ORDER BY created_at LIMIT $4 FOR UPDATE SKIP LOCKED) \
                     RETURNING id, body",
                )
                .bind::<Text, _>(&hidden_until)
                .bind::<Text, _>(&self.name)
                .bind::<Text, _>(&now)
                .bind::<BigInt, _>(max)
                .load(&mut conn)
                .await?
            }
        );

        Ok(rows
            .into_iter()
            .map(|row| ReceivedMessage {
                receipt: Receipt::Db(row.id),
                body: row.body,
            })
            .collect())
    }
}

#[async_trait]
impl MessageQueue for DbQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: &str) -> Result<(), QueueError> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let message = NewQueueMessage {
            id: &id,
            queue_name: &self.name,
            body,
            visible_at: &now,
            receive_count: 0,
            created_at: &now,
        };

        with_conn!(self.pool, conn => {
            diesel::insert_into(queue_messages::table)
                .values(&message)
                .execute(&mut conn)
                .await?
        });
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        self.purge_expired().await?;

        let deadline = tokio::time::Instant::now() + self.options.receive_wait;
        loop {
            let messages = self.claim(max).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let Receipt::Db(id) = receipt else {
            return Err(QueueError::Backend(format!(
                "receipt {:?} does not belong to queue {}",
                receipt, self.name
            )));
        };

        with_conn!(self.pool, conn => {
            diesel::delete(queue_messages::table.find(id))
                .execute(&mut conn)
                .await?
        });
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let count: i64 = with_conn!(self.pool, conn => {
            queue_messages::table
                .filter(queue_messages::queue_name.eq(&self.name))
                .count()
                .get_result(&mut conn)
                .await?
        });
        Ok(count as u64)
    }
}
