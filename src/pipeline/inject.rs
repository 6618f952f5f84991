//! Injector: claims eligible documents and enqueues work for them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::error::PipelineError;
use crate::models::WorkMessage;
use crate::queue::{send_json, MessageQueue};
use crate::repository::DocumentRepository;

/// Result of an injector run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InjectSummary {
    pub queued: usize,
}

pub struct Injector {
    documents: DocumentRepository,
    work: Arc<dyn MessageQueue>,
    stale_after: Duration,
}

impl Injector {
    pub fn new(documents: DocumentRepository, work: Arc<dyn MessageQueue>, stale_after: Duration) -> Self {
        Self {
            documents,
            work,
            stale_after,
        }
    }

    /// Claim `new` and stale `queued` documents and send one work message each.
    pub async fn inject(&self, limit: Option<usize>) -> Result<InjectSummary, PipelineError> {
        self.inject_at(Utc::now(), limit).await
    }

    /// `inject` with an explicit clock, for staleness decisions.
    pub async fn inject_at(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<InjectSummary, PipelineError> {
        let claimed = self
            .documents
            .claim_for_extraction(now, self.stale_after, limit)
            .await?;

        let mut summary = InjectSummary::default();
        for work in &claimed {
            // A failed send leaves the row queued; the stale rule picks it up later.
            self.send(work).await?;
            summary.queued += 1;
        }

        info!("Injected {} documents into {}", summary.queued, self.work.name());
        Ok(summary)
    }

    /// Requeue one document regardless of its status.
    pub async fn inject_one(&self, external_num: &str) -> Result<Option<WorkMessage>, PipelineError> {
        let Some(work) = self.documents.requeue(external_num).await? else {
            warn!(external_num, "No such document");
            return Ok(None);
        };

        self.send(&work).await?;
        info!(doc_id = work.filing_doc_id, external_num, "Requeued document");
        Ok(Some(work))
    }

    async fn send(&self, work: &WorkMessage) -> Result<(), PipelineError> {
        send_json(self.work.as_ref(), work).await?;
        debug!(
            doc_id = work.filing_doc_id,
            external_num = %work.external_num,
            "Sent work message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;
    use crate::queue::MemoryQueue;
    use crate::repository::DbContext;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, DocumentRepository, Arc<MemoryQueue>, Injector) {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::new(&dir.path().join("filings.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.documents();
        let queue = Arc::new(MemoryQueue::new("work"));
        let injector = Injector::new(repo.clone(), queue.clone(), Duration::hours(24));
        (dir, repo, queue, injector)
    }

    #[tokio::test]
    async fn test_inject_sends_one_message_per_claim() {
        let (_dir, repo, queue, injector) = setup().await;
        for n in ["1", "2", "3"] {
            repo.insert_new(n, &format!("http://x/{}.pdf", n)).await.unwrap();
        }

        assert_eq!(injector.inject(Some(2)).await.unwrap().queued, 2);
        assert_eq!(injector.inject(None).await.unwrap().queued, 1);
        assert_eq!(injector.inject(None).await.unwrap().queued, 0);

        let bodies = queue.bodies().await;
        assert_eq!(bodies.len(), 3);
        let first: WorkMessage = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(first.external_num, "1");
    }

    #[tokio::test]
    async fn test_inject_one() {
        let (_dir, repo, queue, injector) = setup().await;
        repo.insert_new("9", "http://x/9.pdf").await.unwrap();
        let id = repo.get_by_external_num("9").await.unwrap().unwrap().id;

        let work = injector.inject_one("9").await.unwrap().unwrap();
        assert_eq!(work.filing_doc_id, id);
        assert_eq!(repo.status_of(id).await.unwrap(), Some(DocumentStatus::Queued));
        assert_eq!(queue.bodies().await.len(), 1);

        assert!(injector.inject_one("missing").await.unwrap().is_none());
        assert_eq!(queue.bodies().await.len(), 1);
    }
}
