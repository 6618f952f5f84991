//! Result collector: the online convergence path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::converge::DocumentUpdater;
use super::error::{ConvergeError, PipelineError};
use crate::models::ResultMessage;
use crate::queue::{MessageQueue, ReceivedMessage};
use crate::repository::ApplyOutcome;
use crate::storage::ObjectStore;

/// Messages requested per receive.
const RECEIVE_BATCH: usize = 10;

/// Result of a collector run (online or batch).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectSummary {
    pub published: usize,
    pub failed: usize,
    pub already_public: usize,
    /// Content could not be fetched; the document stays queued.
    pub fetch_errors: usize,
    /// Result rejected by the update routine; the document is untouched.
    pub integrity_errors: usize,
    pub malformed: usize,
}

impl CollectSummary {
    pub(crate) fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Published { .. } => self.published += 1,
            ApplyOutcome::MarkedFailed => self.failed += 1,
            ApplyOutcome::AlreadyPublic => self.already_public += 1,
        }
    }

    /// Log and count a per-document error; anything else aborts the run.
    pub(crate) fn record_error(&mut self, e: ConvergeError) -> Result<(), PipelineError> {
        if !e.is_per_document() {
            return Err(e.into());
        }
        error!("{}", e);
        self.integrity_errors += 1;
        Ok(())
    }

    /// Results that counted toward the limit.
    pub fn processed(&self) -> usize {
        self.published + self.failed + self.already_public + self.fetch_errors + self.integrity_errors
    }
}

pub struct ResultCollector {
    results: Arc<dyn MessageQueue>,
    text_store: Arc<dyn ObjectStore>,
    updater: DocumentUpdater,
    idle_wait: Duration,
}

impl ResultCollector {
    pub fn new(
        results: Arc<dyn MessageQueue>,
        text_store: Arc<dyn ObjectStore>,
        updater: DocumentUpdater,
        idle_wait: Duration,
    ) -> Self {
        Self {
            results,
            text_store,
            updater,
            idle_wait,
        }
    }

    /// Drain the results queue into the document store.
    ///
    /// Stops after `limit` results, or once a poll comes back empty after
    /// the idle wait.
    pub async fn collect(&self, limit: Option<usize>) -> Result<CollectSummary, PipelineError> {
        let mut summary = CollectSummary::default();
        let mut waited = false;

        loop {
            let want = match limit {
                Some(l) if summary.processed() >= l => break,
                Some(l) => (l - summary.processed()).min(RECEIVE_BATCH),
                None => RECEIVE_BATCH,
            };

            let messages = self.results.receive(want).await?;
            if messages.is_empty() {
                if waited {
                    debug!("No more results");
                    break;
                }
                waited = true;
                debug!("Results queue empty, waiting {:?}", self.idle_wait);
                tokio::time::sleep(self.idle_wait).await;
                continue;
            }
            waited = false;

            for message in messages {
                self.handle(&message, &mut summary).await?;
                self.results.delete(&message.receipt).await?;
            }
        }

        info!(
            "Collected {} results ({} public, {} failed)",
            summary.processed(),
            summary.published,
            summary.failed
        );
        Ok(summary)
    }

    async fn handle(
        &self,
        message: &ReceivedMessage,
        summary: &mut CollectSummary,
    ) -> Result<(), PipelineError> {
        let result: ResultMessage = match message.parse() {
            Ok(result) => result,
            Err(e) => {
                warn!("Cannot parse result message {:?}: {}", message.body, e);
                summary.malformed += 1;
                return Ok(());
            }
        };
        debug!(
            doc_id = result.filing_doc_id(),
            status = result.status_str(),
            "Got result"
        );

        let content = match &result {
            ResultMessage::Failed { .. } => None,
            ResultMessage::Public { content_key, .. } => {
                match self.text_store.get(content_key).await {
                    Ok(object) => Some(object.body),
                    Err(e) => {
                        // Left queued; the injector's stale rule retries it
                        warn!(
                            doc_id = result.filing_doc_id(),
                            key = %content_key,
                            "Cannot fetch extracted text: {}",
                            e
                        );
                        summary.fetch_errors += 1;
                        return Ok(());
                    }
                }
            }
        };

        match self.updater.apply(&result, content.as_deref()).await {
            Ok(outcome) => summary.record(outcome),
            Err(e) => summary.record_error(e)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, PageIndex};
    use crate::queue::{send_json, MemoryQueue};
    use crate::repository::{DbContext, DocumentRepository};
    use crate::storage::{Metadata, MemoryObjectStore};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: DocumentRepository,
        queue: Arc<MemoryQueue>,
        store: Arc<MemoryObjectStore>,
        collector: ResultCollector,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::new(&dir.path().join("filings.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.documents();
        let queue = Arc::new(MemoryQueue::new("results"));
        let store = Arc::new(MemoryObjectStore::new("text"));
        let collector = ResultCollector::new(
            queue.clone(),
            store.clone(),
            DocumentUpdater::new(repo.clone()),
            Duration::ZERO,
        );
        Fixture {
            _dir: dir,
            repo,
            queue,
            store,
            collector,
        }
    }

    async fn add(repo: &DocumentRepository, num: &str) -> i64 {
        repo.insert_new(num, "http://x").await.unwrap();
        repo.get_by_external_num(num).await.unwrap().unwrap().id
    }

    fn public(id: i64, num: &str) -> ResultMessage {
        ResultMessage::Public {
            filing_doc_id: id,
            external_num: num.to_string(),
            page_count: 1,
            content_key: format!("text/{}.txt", num),
            pages: vec![PageIndex {
                number: 1,
                size: 5,
                offset: 0,
            }],
        }
    }

    #[tokio::test]
    async fn test_collect_public_and_failed() {
        let f = fixture().await;
        let a = add(&f.repo, "a").await;
        let b = add(&f.repo, "b").await;
        f.store
            .put("text/a.txt", b"hello", Metadata::new())
            .await
            .unwrap();

        send_json(f.queue.as_ref(), &public(a, "a")).await.unwrap();
        send_json(
            f.queue.as_ref(),
            &ResultMessage::Failed {
                filing_doc_id: b,
                external_num: "b".to_string(),
                reason: None,
            },
        )
        .await
        .unwrap();
        f.queue.send("garbage").await.unwrap();

        let summary = f.collector.collect(None).await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.malformed, 1);
        assert!(f.queue.bodies().await.is_empty());

        assert_eq!(f.repo.status_of(a).await.unwrap(), Some(DocumentStatus::Public));
        assert_eq!(f.repo.get_pages(a).await.unwrap()[0].text, "hello");
        assert_eq!(f.repo.status_of(b).await.unwrap(), Some(DocumentStatus::Failed));
        // The artifact stays for the batch path and the extraction fence
        assert!(f.store.exists("text/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_content_drops_message() {
        let f = fixture().await;
        let a = add(&f.repo, "a").await;
        send_json(f.queue.as_ref(), &public(a, "a")).await.unwrap();

        let summary = f.collector.collect(None).await.unwrap();
        assert_eq!(summary.fetch_errors, 1);
        assert!(f.queue.bodies().await.is_empty());
        assert_eq!(f.repo.status_of(a).await.unwrap(), Some(DocumentStatus::New));
    }

    #[tokio::test]
    async fn test_limit() {
        let f = fixture().await;
        for num in ["a", "b", "c"] {
            let id = add(&f.repo, num).await;
            send_json(
                f.queue.as_ref(),
                &ResultMessage::Failed {
                    filing_doc_id: id,
                    external_num: num.to_string(),
                    reason: None,
                },
            )
            .await
            .unwrap();
        }

        let summary = f.collector.collect(Some(2)).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(f.queue.bodies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_document_is_counted() {
        let f = fixture().await;
        send_json(
            f.queue.as_ref(),
            &ResultMessage::Failed {
                filing_doc_id: 404,
                external_num: "gone".to_string(),
                reason: None,
            },
        )
        .await
        .unwrap();

        let summary = f.collector.collect(None).await.unwrap();
        assert_eq!(summary.integrity_errors, 1);
        assert!(f.queue.bodies().await.is_empty());
    }
}
