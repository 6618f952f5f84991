//! End-to-end pipeline tests against a real SQLite database, in-memory
//! queues and buckets, and a shell script standing in for the extraction tool.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use filingtext::models::{DocumentStatus, Page, PageIndex, ResultMessage};
use filingtext::pipeline::artifact::text_key;
use filingtext::pipeline::{
    BatchCollector, DocumentUpdater, ExtractionTool, ExtractionWorker, Injector, ResultCollector,
};
use filingtext::queue::{MemoryQueue, MessageQueue};
use filingtext::repository::{ApplyOutcome, DbContext, DocumentRepository};
use filingtext::storage::{MemoryObjectStore, ObjectStore};

/// Writes "ab" and "cde" as two pages; URLs containing "broken" fail.
const TOOL: &str = r#"case "$1" in *broken*) echo "cannot parse pdf" >&2; exit 3;; esac
mkdir -p "$2/text" "$2/jpeg"
printf 'ab' > "$2/text/page-1.txt"
printf 'cde' > "$2/text/page-2.txt"
printf 'jpg' > "$2/jpeg/page-2.jpg""#;

fn write_tool(dir: &Path) -> ExtractionTool {
    let path = dir.join("filingtext-extract");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", TOOL)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    ExtractionTool::resolve(path.to_str().unwrap(), None).unwrap()
}

struct Harness {
    dir: TempDir,
    documents: DocumentRepository,
    work: Arc<MemoryQueue>,
    results: Arc<MemoryQueue>,
    text: Arc<MemoryObjectStore>,
    images: Arc<MemoryObjectStore>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_metadata_limit(filingtext::storage::DEFAULT_MAX_METADATA_BYTES).await
    }

    async fn with_metadata_limit(limit: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let documents = database(dir.path(), "filings.db").await;
        Self {
            dir,
            documents,
            work: Arc::new(MemoryQueue::new("work")),
            results: Arc::new(MemoryQueue::new("results")),
            text: Arc::new(MemoryObjectStore::with_metadata_limit("text", limit)),
            images: Arc::new(MemoryObjectStore::new("images")),
        }
    }

    fn injector(&self) -> Injector {
        Injector::new(
            self.documents.clone(),
            self.work.clone(),
            chrono::Duration::hours(24),
        )
    }

    fn worker(&self) -> ExtractionWorker {
        ExtractionWorker::new(
            self.work.clone(),
            self.text.clone(),
            self.images.clone(),
            write_tool(self.dir.path()),
        )
        .publish_to(self.results.clone())
    }

    fn collector(&self) -> ResultCollector {
        ResultCollector::new(
            self.results.clone(),
            self.text.clone(),
            DocumentUpdater::new(self.documents.clone()),
            Duration::ZERO,
        )
    }

    async fn add(&self, external_num: &str, url: &str) -> i64 {
        assert!(self.documents.insert_new(external_num, url).await.unwrap());
        self.documents
            .get_by_external_num(external_num)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    async fn status(&self, id: i64) -> DocumentStatus {
        self.documents.status_of(id).await.unwrap().unwrap()
    }
}

async fn database(dir: &Path, name: &str) -> DocumentRepository {
    let ctx = DbContext::new(&dir.join(name));
    ctx.init_schema().await.unwrap();
    ctx.documents()
}

fn expected_pages(doc_id: i64) -> Vec<Page> {
    vec![
        Page::new(doc_id, 1, "ab".to_string()),
        Page::new(doc_id, 2, "cde".to_string()),
    ]
}

#[tokio::test]
async fn test_online_pipeline_converges() {
    let h = Harness::new().await;
    let good = h.add("6017", "http://filings/6017.pdf").await;
    let bad = h.add("6018", "http://filings/broken.pdf").await;

    assert_eq!(h.injector().inject(None).await.unwrap().queued, 2);
    assert_eq!(h.status(good).await, DocumentStatus::Queued);

    let extracted = h.worker().extract(Some(2)).await.unwrap();
    assert_eq!(extracted.extracted, 1);
    assert_eq!(extracted.failed, 1);
    assert!(h.images.exists("6017/page-2.jpg").await.unwrap());

    let collected = h.collector().collect(None).await.unwrap();
    assert_eq!(collected.published, 1);
    assert_eq!(collected.failed, 1);

    assert_eq!(h.status(good).await, DocumentStatus::Public);
    assert_eq!(h.status(bad).await, DocumentStatus::Failed);
    assert_eq!(h.documents.get_pages(good).await.unwrap(), expected_pages(good));
    assert_eq!(h.documents.get(good).await.unwrap().unwrap().page_count, Some(2));
    assert!(h.documents.get_pages(bad).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_results_converge_once() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    h.injector().inject(None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();

    // Redeliver the same result
    let body = h.results.bodies().await.remove(0);
    h.results.send(&body).await.unwrap();

    let summary = h.collector().collect(None).await.unwrap();
    assert_eq!(summary.published, 1);
    assert_eq!(summary.already_public, 1);
    assert_eq!(h.documents.get_pages(id).await.unwrap(), expected_pages(id));
}

#[tokio::test]
async fn test_redelivered_work_is_extracted_once() {
    let h = Harness::new().await;
    h.add("6017", "http://filings/6017.pdf").await;
    h.injector().inject(None).await.unwrap();

    let body = h.work.bodies().await.remove(0);
    h.work.send(&body).await.unwrap();

    let summary = h.worker().extract(Some(2)).await.unwrap();
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.skipped, 1);

    // The skipped delivery resends the stored result unchanged
    let bodies = h.results.bodies().await;
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn test_lost_result_recovers_through_stale_requeue() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    let injector = h.injector();

    let start = Utc::now();
    injector.inject_at(start, None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();

    // The result message is lost before any collector sees it
    let lost = h.results.receive(1).await.unwrap().remove(0);
    h.results.delete(&lost.receipt).await.unwrap();
    assert_eq!(h.status(id).await, DocumentStatus::Queued);

    let late = start + chrono::Duration::hours(25);
    assert_eq!(injector.inject_at(late, None).await.unwrap().queued, 1);

    let again = h.worker().extract(Some(1)).await.unwrap();
    assert_eq!(again.skipped, 1);

    assert_eq!(h.collector().collect(None).await.unwrap().published, 1);
    assert_eq!(h.status(id).await, DocumentStatus::Public);
    assert_eq!(h.documents.get_pages(id).await.unwrap(), expected_pages(id));
}

#[tokio::test]
async fn test_requeued_public_document_converges_again() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    h.injector().inject(None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();
    h.collector().collect(None).await.unwrap();

    h.injector().inject_one("6017").await.unwrap().unwrap();
    assert_eq!(h.status(id).await, DocumentStatus::Queued);

    h.worker().extract(Some(1)).await.unwrap();
    h.collector().collect(None).await.unwrap();
    assert_eq!(h.status(id).await, DocumentStatus::Public);
    assert_eq!(h.documents.get_pages(id).await.unwrap(), expected_pages(id));
}

#[tokio::test]
async fn test_failed_result_never_overrides_public() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    let updater = DocumentUpdater::new(h.documents.clone());

    let public = ResultMessage::Public {
        filing_doc_id: id,
        external_num: "6017".to_string(),
        page_count: 1,
        content_key: text_key("6017"),
        pages: vec![PageIndex {
            number: 1,
            size: 2,
            offset: 0,
        }],
    };
    let failed = ResultMessage::Failed {
        filing_doc_id: id,
        external_num: "6017".to_string(),
        reason: Some("timed out after 600s".to_string()),
    };

    // failed then public
    assert_eq!(
        updater.apply(&failed, None).await.unwrap(),
        ApplyOutcome::MarkedFailed
    );
    assert_eq!(h.status(id).await, DocumentStatus::Failed);
    assert_eq!(
        updater.apply(&public, Some(b"ok".as_slice())).await.unwrap(),
        ApplyOutcome::Published { pages: 1 }
    );

    // public then failed
    assert_eq!(
        updater.apply(&failed, None).await.unwrap(),
        ApplyOutcome::AlreadyPublic
    );
    assert_eq!(h.status(id).await, DocumentStatus::Public);
    assert_eq!(h.documents.get_pages(id).await.unwrap()[0].text, "ok");
}

#[tokio::test]
async fn test_stale_documents_are_requeued() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    let injector = h.injector();

    let start = Utc::now();
    assert_eq!(injector.inject_at(start, None).await.unwrap().queued, 1);

    let early = start + chrono::Duration::hours(23);
    assert_eq!(injector.inject_at(early, None).await.unwrap().queued, 0);

    let late = start + chrono::Duration::hours(25);
    assert_eq!(injector.inject_at(late, None).await.unwrap().queued, 1);
    assert_eq!(h.work.depth().await.unwrap(), 2);
    assert_eq!(h.status(id).await, DocumentStatus::Queued);
}

#[tokio::test]
async fn test_public_documents_are_not_requeued() {
    let h = Harness::new().await;
    h.add("6017", "http://filings/6017.pdf").await;
    let injector = h.injector();

    let start = Utc::now();
    injector.inject_at(start, None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();
    h.collector().collect(None).await.unwrap();

    let much_later = start + chrono::Duration::days(30);
    assert_eq!(injector.inject_at(much_later, None).await.unwrap().queued, 0);
}

#[tokio::test]
async fn test_batch_matches_online() {
    let h = Harness::new().await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    h.injector().inject(None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();

    // A second database with the same document, fed only from the bucket
    let offline = database(h.dir.path(), "offline.db").await;
    offline
        .insert_new("6017", "http://filings/6017.pdf")
        .await
        .unwrap();
    let batch = BatchCollector::new(h.text.clone(), DocumentUpdater::new(offline.clone()));
    assert_eq!(batch.collect_batch(None).await.unwrap().published, 1);

    h.collector().collect(None).await.unwrap();

    let online_pages = h.documents.get_pages(id).await.unwrap();
    assert_eq!(offline.get_pages(id).await.unwrap(), online_pages);
    assert_eq!(
        offline.status_of(id).await.unwrap(),
        Some(DocumentStatus::Public)
    );
}

#[tokio::test]
async fn test_metadata_fallback_round_trip() {
    let h = Harness::with_metadata_limit(64).await;
    let id = h.add("6017", "http://filings/6017.pdf").await;
    h.injector().inject(None).await.unwrap();
    h.worker().extract(Some(1)).await.unwrap();

    assert!(h.text.exists("meta/6017.json").await.unwrap());

    let batch = BatchCollector::new(h.text.clone(), DocumentUpdater::new(h.documents.clone()));
    assert_eq!(batch.collect_batch(None).await.unwrap().published, 1);
    assert_eq!(h.documents.get_pages(id).await.unwrap(), expected_pages(id));

    // The queued result arrives late and is absorbed
    let late = h.collector().collect(None).await.unwrap();
    assert_eq!(late.already_public, 1);
}
