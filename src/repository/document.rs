//! Document and page persistence.
//!
//! The two statements with cross-process guarantees live here: the
//! injector's claim (one `UPDATE ... RETURNING`) and the page replacement
//! performed when a result converges (one transaction per document).

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::models::{ClaimedDocumentRow, DocumentRecord, NewDocument, NewPage, PageRecord};
use super::pool::{DbError, DbPool};
use super::util::{format_timestamp, now_timestamp, to_diesel_error};
use crate::models::{Document, DocumentStatus, Page, WorkMessage};
use crate::schema::{documents, pages};
use crate::{with_conn, with_conn_split};

/// How a document should be resolved by the convergence routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Replace the page set and mark the document public.
    Publish { page_count: u32, pages: Vec<Page> },
    /// Mark the document failed.
    Fail,
}

/// What `apply_resolution` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Published { pages: usize },
    MarkedFailed,
    /// The document was already public; nothing changed.
    AlreadyPublic,
}

/// Repository for documents and their pages.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: DbPool,
}

impl DocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a candidate document with status `new`.
    ///
    /// Returns `false` when a document with the same external number already
    /// exists; the unique index is what keeps re-crawls from duplicating rows.
    pub async fn insert_new(&self, external_num: &str, source_url: &str) -> Result<bool, DbError> {
        let now = now_timestamp();
        let record = NewDocument {
            external_num,
            source_url,
            status: DocumentStatus::New.as_str(),
            page_count: None,
            created_at: &now,
            updated_at: &now,
        };

        let inserted = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::insert_or_ignore_into(documents::table)
                    .values(&record)
                    .execute(&mut conn)
                    .await?
            },
            postgres: conn => {
                diesel::insert_into(documents::table)
                    .values(&record)
                    .on_conflict_do_nothing()
                    .execute(&mut conn)
                    .await?
            }
        );
        Ok(inserted == 1)
    }

    /// Get a document by row ID.
    pub async fn get(&self, id: i64) -> Result<Option<Document>, DbError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .find(id)
                .select(DocumentRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        record.map(Document::try_from).transpose()
    }

    /// Get a document by its external number.
    pub async fn get_by_external_num(
        &self,
        external_num: &str,
    ) -> Result<Option<Document>, DbError> {
        let record: Option<DocumentRecord> = with_conn!(self.pool, conn => {
            documents::table
                .filter(documents::external_num.eq(external_num))
                .select(DocumentRecord::as_select())
                .first(&mut conn)
                .await
                .optional()
        })?;
        record.map(Document::try_from).transpose()
    }

    /// Current status of a document, `None` if it does not exist.
    pub async fn status_of(&self, id: i64) -> Result<Option<DocumentStatus>, DbError> {
        let status: Option<String> = with_conn!(self.pool, conn => {
            documents::table
                .find(id)
                .select(documents::status)
                .first(&mut conn)
                .await
                .optional()
        })?;
        Ok(status.and_then(|s| DocumentStatus::from_str(&s)))
    }

    /// Atomically claim documents for extraction.
    ///
    /// Selects `new` documents plus `queued` ones untouched for longer than
    /// `stale_after` (as of `now`), flips them to `queued` and returns them in
    /// the same statement, so two injector runs never claim the same row.
    pub async fn claim_for_extraction(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        limit: Option<usize>,
    ) -> Result<Vec<WorkMessage>, DbError> {
        let now_ts = format_timestamp(now);
        let stale_before = format_timestamp(now - stale_after);
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);

        let rows: Vec<ClaimedDocumentRow> = with_conn_split!(self.pool,
            sqlite: conn => {
                diesel::sql_query(
                    "UPDATE documents SET status = 'queued', updated_at = ? \
                     WHERE id IN ( \
                         SELECT id FROM documents \
                         WHERE status = 'new' OR (status = 'queued' AND updated_at < ?) \
                         ORDER BY id LIMIT ?) \
                     RETURNING id, external_num, source_url",
                )
                .bind::<Text, _>(&now_ts)
                .bind::<Text, _>(&stale_before)
                .bind::<BigInt, _>(limit)
                .load(&mut conn)
                .await?
            },
            postgres: conn => {
                diesel::sql_query(
                    "UPDATE documents SET status = 'queued', updated_at = $1 \
                     WHERE id IN ( \
                         SELECT id FROM documents \
                         WHERE status = 'new' OR (status = 'queued' AND updated_at < $2) \
                         ORDER BY id LIMIT $3 FOR UPDATE SKIP LOCKED) \
                     RETURNING id, external_num, source_url",
                )
                .bind::<Text, _>(&now_ts)
                .bind::<Text, _>(&stale_before)
                .bind::<BigInt, _>(limit)
                .load(&mut conn)
                .await?
            }
        );

        let mut claimed: Vec<WorkMessage> = rows
            .into_iter()
            .map(|row| WorkMessage {
                filing_doc_id: row.id,
                external_num: row.external_num,
                source_url: row.source_url,
            })
            .collect();
        // RETURNING order is unspecified.
        claimed.sort_by_key(|w| w.filing_doc_id);
        Ok(claimed)
    }

    /// Force a single document back to `queued`, whatever its status.
    pub async fn requeue(&self, external_num: &str) -> Result<Option<WorkMessage>, DbError> {
        let external_num = external_num.to_string();
        let now = now_timestamp();

        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let record: Option<DocumentRecord> = documents::table
                        .filter(documents::external_num.eq(&external_num))
                        .select(DocumentRecord::as_select())
                        .first(conn)
                        .await
                        .optional()?;

                    let Some(record) = record else {
                        return Ok(None);
                    };

                    diesel::update(documents::table.find(record.id))
                        .set((
                            documents::status.eq(DocumentStatus::Queued.as_str()),
                            documents::updated_at.eq(&now),
                        ))
                        .execute(conn)
                        .await?;

                    Ok(Some(WorkMessage {
                        filing_doc_id: record.id,
                        external_num: record.external_num,
                        source_url: record.source_url,
                    }))
                })
            })
            .await
        })
    }

    /// Resolve a document inside one transaction.
    ///
    /// Re-checks the `public` fast path under the transaction, then either
    /// replaces the full page set (delete-then-insert) and marks the document
    /// public, or marks it failed.
    pub async fn apply_resolution(
        &self,
        id: i64,
        resolution: Resolution,
    ) -> Result<Option<ApplyOutcome>, DbError> {
        let now = now_timestamp();

        with_conn!(self.pool, conn => {
            conn.transaction::<_, DbError, _>(|conn| {
                Box::pin(async move {
                    let status: Option<String> = documents::table
                        .find(id)
                        .select(documents::status)
                        .first(conn)
                        .await
                        .optional()?;

                    match status.as_deref() {
                        None => return Ok(None),
                        Some("public") => return Ok(Some(ApplyOutcome::AlreadyPublic)),
                        Some(_) => {}
                    }

                    match resolution {
                        Resolution::Publish { page_count, pages: new_pages } => {
                            let page_count = i32::try_from(page_count).map_err(|_| {
                                to_diesel_error(format!("page_count {} out of range", page_count))
                            })?;
                            let rows = new_pages
                                .into_iter()
                                .map(NewPage::try_from)
                                .collect::<Result<Vec<_>, DbError>>()?;

                            diesel::update(documents::table.find(id))
                                .set((
                                    documents::status.eq(DocumentStatus::Public.as_str()),
                                    documents::page_count.eq(Some(page_count)),
                                    documents::updated_at.eq(&now),
                                ))
                                .execute(conn)
                                .await?;

                            diesel::delete(pages::table.filter(pages::document_id.eq(id)))
                                .execute(conn)
                                .await?;

                            for row in &rows {
                                diesel::insert_into(pages::table)
                                    .values(row)
                                    .execute(conn)
                                    .await?;
                            }

                            Ok(Some(ApplyOutcome::Published { pages: rows.len() }))
                        }
                        Resolution::Fail => {
                            diesel::update(documents::table.find(id))
                                .set((
                                    documents::status.eq(DocumentStatus::Failed.as_str()),
                                    documents::updated_at.eq(&now),
                                ))
                                .execute(conn)
                                .await?;
                            Ok(Some(ApplyOutcome::MarkedFailed))
                        }
                    }
                })
            })
            .await
        })
    }

    /// Pages of a document in page order.
    pub async fn get_pages(&self, document_id: i64) -> Result<Vec<Page>, DbError> {
        let records: Vec<PageRecord> = with_conn!(self.pool, conn => {
            pages::table
                .filter(pages::document_id.eq(document_id))
                .order(pages::page_number.asc())
                .select(PageRecord::as_select())
                .load(&mut conn)
                .await
        })?;
        Ok(records.into_iter().map(Page::from).collect())
    }

    /// Number of documents in each status. Statuses with no documents are
    /// reported as zero.
    pub async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, u64)>, DbError> {
        use diesel::dsl::count_star;

        let rows: Vec<(String, i64)> = with_conn!(self.pool, conn => {
            documents::table
                .group_by(documents::status)
                .select((documents::status, count_star()))
                .load(&mut conn)
                .await
        })?;

        Ok(DocumentStatus::ALL
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map(|(_, c)| *c as u64)
                    .unwrap_or(0);
                (*status, count)
            })
            .collect())
    }
}
