//! Batch collector: rebuilds results by scanning the text bucket.
//!
//! Recovers documents whose result messages expired or were lost. Each text
//! artifact is turned back into the `ResultMessage` the worker would have
//! published and fed to the same update routine as the online path.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::artifact::{describe_artifact, DescribeError, TEXT_PREFIX};
use super::collect::CollectSummary;
use super::converge::DocumentUpdater;
use super::error::PipelineError;
use crate::models::ResultMessage;
use crate::storage::{ObjectStore, ObjectStoreError};

pub struct BatchCollector {
    text_store: Arc<dyn ObjectStore>,
    updater: DocumentUpdater,
}

impl BatchCollector {
    pub fn new(text_store: Arc<dyn ObjectStore>, updater: DocumentUpdater) -> Self {
        Self {
            text_store,
            updater,
        }
    }

    /// Scan every text artifact and converge its document.
    ///
    /// `limit` caps the number of documents updated; artifacts of documents
    /// that are already public are skipped without counting.
    pub async fn collect_batch(&self, limit: Option<usize>) -> Result<CollectSummary, PipelineError> {
        let keys = self.text_store.list(TEXT_PREFIX).await?;
        debug!("Found {} text artifacts", keys.len());

        let mut summary = CollectSummary::default();
        for key in keys {
            if limit.is_some_and(|l| summary.processed() - summary.already_public >= l) {
                break;
            }

            let Some(result) = self.describe(&key, &mut summary).await? else {
                continue;
            };

            let doc_id = result.filing_doc_id();
            if self.updater.is_public(doc_id).await? {
                debug!(doc_id, key = %key, "Already public");
                summary.already_public += 1;
                continue;
            }

            let content = match self.text_store.get(&key).await {
                Ok(object) => object.body,
                Err(ObjectStoreError::NotFound { .. }) => {
                    warn!(key = %key, "Artifact vanished during scan");
                    summary.fetch_errors += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.updater.apply(&result, Some(content.as_slice())).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => summary.record_error(e)?,
            }
        }

        info!(
            "Batch collected {} documents ({} already public)",
            summary.published + summary.failed,
            summary.already_public
        );
        Ok(summary)
    }

    /// Rebuild the result for a text artifact, counting artifacts that
    /// cannot be described.
    async fn describe(
        &self,
        key: &str,
        summary: &mut CollectSummary,
    ) -> Result<Option<ResultMessage>, PipelineError> {
        match describe_artifact(self.text_store.as_ref(), key).await {
            Ok(result) => Ok(result),
            Err(DescribeError::MissingMetaObject(meta_key)) => {
                warn!(key, meta_key = %meta_key, "Metadata object missing");
                summary.fetch_errors += 1;
                Ok(None)
            }
            Err(DescribeError::Artifact(reason)) => {
                warn!(key, "Cannot describe artifact: {}", reason);
                summary.malformed += 1;
                Ok(None)
            }
            Err(DescribeError::Store(e)) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, PageIndex};
    use crate::pipeline::artifact::{encode_metadata, fallback_metadata, meta_key, text_key};
    use crate::repository::{DbContext, DocumentRepository};
    use crate::storage::{Metadata, MemoryObjectStore};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, DocumentRepository, Arc<MemoryObjectStore>, BatchCollector) {
        let dir = TempDir::new().unwrap();
        let ctx = DbContext::new(&dir.path().join("filings.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.documents();
        let store = Arc::new(MemoryObjectStore::new("text"));
        let collector = BatchCollector::new(store.clone(), DocumentUpdater::new(repo.clone()));
        (dir, repo, store, collector)
    }

    async fn add(repo: &DocumentRepository, num: &str) -> ResultMessage {
        repo.insert_new(num, "http://x").await.unwrap();
        let id = repo.get_by_external_num(num).await.unwrap().unwrap().id;
        ResultMessage::Public {
            filing_doc_id: id,
            external_num: num.to_string(),
            page_count: 1,
            content_key: text_key(num),
            pages: vec![PageIndex {
                number: 1,
                size: 4,
                offset: 0,
            }],
        }
    }

    #[tokio::test]
    async fn test_inline_and_fallback_artifacts() {
        let (_dir, repo, store, collector) = setup().await;

        let inline = add(&repo, "1").await;
        store
            .put(&text_key("1"), b"page", encode_metadata(&inline))
            .await
            .unwrap();

        let referenced = add(&repo, "2").await;
        let meta = meta_key("2");
        store
            .put(&meta, &serde_json::to_vec(&referenced).unwrap(), Metadata::new())
            .await
            .unwrap();
        store
            .put(
                &text_key("2"),
                b"text",
                fallback_metadata(&meta, referenced.filing_doc_id()),
            )
            .await
            .unwrap();

        let summary = collector.collect_batch(None).await.unwrap();
        assert_eq!(summary.published, 2);

        let pages = repo.get_pages(referenced.filing_doc_id()).await.unwrap();
        assert_eq!(pages[0].text, "text");

        // Second pass finds everything public
        let again = collector.collect_batch(None).await.unwrap();
        assert_eq!(again.already_public, 2);
        assert_eq!(again.published, 0);
    }

    #[tokio::test]
    async fn test_undescribable_artifacts_are_skipped() {
        let (_dir, repo, store, collector) = setup().await;

        let orphan = add(&repo, "1").await;
        store
            .put(
                &text_key("1"),
                b"page",
                fallback_metadata(&meta_key("1"), orphan.filing_doc_id()),
            )
            .await
            .unwrap();
        store
            .put(&text_key("2"), b"page", Metadata::new())
            .await
            .unwrap();

        let summary = collector.collect_batch(None).await.unwrap();
        assert_eq!(summary.fetch_errors, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(
            repo.status_of(orphan.filing_doc_id()).await.unwrap(),
            Some(DocumentStatus::New)
        );
    }

    #[tokio::test]
    async fn test_limit_counts_updates() {
        let (_dir, repo, store, collector) = setup().await;
        for num in ["1", "2", "3"] {
            let result = add(&repo, num).await;
            store
                .put(&text_key(num), b"page", encode_metadata(&result))
                .await
                .unwrap();
        }

        assert_eq!(collector.collect_batch(Some(2)).await.unwrap().published, 2);
        let rest = collector.collect_batch(Some(2)).await.unwrap();
        assert_eq!(rest.already_public, 2);
        assert_eq!(rest.published, 1);
    }
}
