//! Extraction worker.
//!
//! Pulls work messages, runs the extraction tool in a scratch directory and
//! uploads the concatenated page text (plus page images) to the object store.
//! The text artifact doubles as the idempotency fence: a document whose
//! artifact already exists is never extracted again. A publishing worker
//! resends the result stored with that artifact instead, so a requeued
//! document whose earlier result was lost still converges.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::artifact::{
    describe_artifact, encode_metadata, fallback_metadata, image_key, image_metadata, meta_key,
    text_key, DescribeError,
};
use super::error::PipelineError;
use super::tool::{collect_outputs, ExtractionTool, PageFile, ToolStatus};
use crate::models::{PageIndex, ResultMessage, WorkMessage};
use crate::queue::{send_json, MessageQueue, ReceivedMessage};
use crate::storage::{Metadata, ObjectStore, ObjectStoreError};

/// What happened to one work message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Artifact written.
    Extracted { pages: usize },
    /// Tool failed or produced nothing.
    Failed { reason: String },
    /// Artifact already present; extraction skipped.
    Skipped,
    /// Neither the artifact nor its fallback could be written. No result is
    /// recorded anywhere; the stale-requeue rule will retry the document.
    Unrecorded,
}

/// Result of a worker run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unrecorded: usize,
    pub malformed: usize,
}

impl ExtractSummary {
    fn record(&mut self, outcome: &ExtractOutcome) {
        match outcome {
            ExtractOutcome::Extracted { .. } => self.extracted += 1,
            ExtractOutcome::Failed { .. } => self.failed += 1,
            ExtractOutcome::Skipped => self.skipped += 1,
            ExtractOutcome::Unrecorded => self.unrecorded += 1,
        }
    }

    /// Messages that counted toward the limit.
    pub fn processed(&self) -> usize {
        self.extracted + self.failed + self.skipped + self.unrecorded
    }
}

/// Concatenated page text and its byte-range index.
struct TextBundle {
    content: Vec<u8>,
    pages: Vec<PageIndex>,
}

async fn concatenate(text_pages: &[PageFile]) -> std::io::Result<TextBundle> {
    let mut content = Vec::new();
    let mut pages = Vec::with_capacity(text_pages.len());
    for file in text_pages {
        let bytes = tokio::fs::read(&file.path).await?;
        pages.push(PageIndex {
            number: file.number,
            size: bytes.len() as u64,
            offset: content.len() as u64,
        });
        content.extend_from_slice(&bytes);
    }
    Ok(TextBundle { content, pages })
}

pub struct ExtractionWorker {
    work: Arc<dyn MessageQueue>,
    results: Option<Arc<dyn MessageQueue>>,
    text_store: Arc<dyn ObjectStore>,
    image_store: Arc<dyn ObjectStore>,
    tool: ExtractionTool,
}

impl ExtractionWorker {
    /// A worker that only writes artifacts. Results are then discovered by
    /// the batch collector.
    pub fn new(
        work: Arc<dyn MessageQueue>,
        text_store: Arc<dyn ObjectStore>,
        image_store: Arc<dyn ObjectStore>,
        tool: ExtractionTool,
    ) -> Self {
        Self {
            work,
            results: None,
            text_store,
            image_store,
            tool,
        }
    }

    /// Also publish every result to `results`.
    pub fn publish_to(mut self, results: Arc<dyn MessageQueue>) -> Self {
        self.results = Some(results);
        self
    }

    /// Process work messages until `limit` have been handled, or forever.
    ///
    /// Store and queue errors abort the run; the fence makes a restart safe.
    pub async fn extract(&self, limit: Option<usize>) -> Result<ExtractSummary, PipelineError> {
        let mut summary = ExtractSummary::default();
        info!(
            tool = %self.tool.program().display(),
            publish = self.results.is_some(),
            "Extraction worker started"
        );

        while limit.map_or(true, |l| summary.processed() < l) {
            let Some(message) = self.work.receive(1).await?.into_iter().next() else {
                // The queue's long poll paces this loop
                continue;
            };

            // Ownership passes to this worker on receipt
            self.work.delete(&message.receipt).await?;

            let Some(work) = Self::parse(&message) else {
                summary.malformed += 1;
                continue;
            };

            let outcome = self.process(&work).await?;
            summary.record(&outcome);
        }

        Ok(summary)
    }

    fn parse(message: &ReceivedMessage) -> Option<WorkMessage> {
        match message.parse::<WorkMessage>() {
            Ok(work) => Some(work),
            Err(e) => {
                warn!("Cannot parse work message {:?}: {}", message.body, e);
                None
            }
        }
    }

    /// Extract one document and publish its result.
    pub async fn process(&self, work: &WorkMessage) -> Result<ExtractOutcome, PipelineError> {
        let doc_id = work.filing_doc_id;
        let external_num = work.external_num.as_str();
        let key = text_key(external_num);

        if self.text_store.exists(&key).await? {
            info!(doc_id, external_num, key = %key, "Artifact exists, skipping extraction");
            if let Some(ref results) = self.results {
                self.republish(results.as_ref(), doc_id, &key).await?;
            }
            return Ok(ExtractOutcome::Skipped);
        }

        info!(doc_id, external_num, url = %work.source_url, "Extracting");
        let (outcome, result) = self.run_tool(work, &key).await?;

        if let Some(result) = result {
            if let Some(ref results) = self.results {
                send_json(results.as_ref(), &result).await?;
                debug!(doc_id, status = result.status_str(), "Published result");
            }
        }
        Ok(outcome)
    }

    /// Resend the result recorded with an existing artifact.
    async fn republish(
        &self,
        results: &dyn MessageQueue,
        doc_id: i64,
        key: &str,
    ) -> Result<(), PipelineError> {
        match describe_artifact(self.text_store.as_ref(), key).await {
            Ok(Some(result)) => {
                send_json(results, &result).await?;
                debug!(doc_id, key, "Republished stored result");
            }
            Ok(None) => {}
            Err(DescribeError::Store(e)) => return Err(e.into()),
            Err(e) => warn!(doc_id, key, "Cannot republish stored result: {}", e),
        }
        Ok(())
    }

    async fn run_tool(
        &self,
        work: &WorkMessage,
        key: &str,
    ) -> Result<(ExtractOutcome, Option<ResultMessage>), PipelineError> {
        let doc_id = work.filing_doc_id;

        // Removed on drop, whichever way this function exits
        let workdir = tempfile::Builder::new()
            .prefix("extraction-")
            .suffix(&format!("-{}", doc_id))
            .tempdir()?;

        if let ToolStatus::Failed(reason) = self.tool.run(&work.source_url, workdir.path()).await? {
            warn!(doc_id, external_num = %work.external_num, %reason, "Extraction failed");
            return Ok(Self::failed(work, reason));
        }

        let outputs = collect_outputs(workdir.path()).await?;

        for image in &outputs.images {
            self.upload_image(work, image).await;
        }

        if outputs.text_pages.is_empty() {
            warn!(doc_id, external_num = %work.external_num, "Extraction produced no pages");
            return Ok(Self::failed(work, "no pages produced".to_string()));
        }

        let bundle = concatenate(&outputs.text_pages).await?;
        let page_count = bundle.pages.len();
        let result = ResultMessage::Public {
            filing_doc_id: doc_id,
            external_num: work.external_num.clone(),
            page_count: page_count as u32,
            content_key: key.to_string(),
            pages: bundle.pages,
        };

        if !self.store_text(key, &bundle.content, &result).await? {
            return Ok((ExtractOutcome::Unrecorded, None));
        }

        info!(doc_id, external_num = %work.external_num, pages = page_count, "Extracted");
        Ok((ExtractOutcome::Extracted { pages: page_count }, Some(result)))
    }

    fn failed(work: &WorkMessage, reason: String) -> (ExtractOutcome, Option<ResultMessage>) {
        let result = ResultMessage::failed(work, reason.clone());
        (ExtractOutcome::Failed { reason }, Some(result))
    }

    /// Images are an archival side effect; a failed upload does not affect
    /// the document's result.
    async fn upload_image(&self, work: &WorkMessage, image: &PageFile) {
        let key = image_key(&work.external_num, image.number);
        let upload = async {
            let bytes = tokio::fs::read(&image.path).await?;
            self.image_store.put(&key, &bytes, image_metadata()).await?;
            Ok::<_, ObjectStoreError>(())
        };
        if let Err(e) = upload.await {
            warn!(doc_id = work.filing_doc_id, key = %key, "Image upload failed: {}", e);
        }
    }

    /// Write the text artifact with inline metadata, falling back to a
    /// separate metadata object when the inline metadata is too large.
    ///
    /// Returns `false` if the fallback also failed.
    async fn store_text(
        &self,
        key: &str,
        content: &[u8],
        result: &ResultMessage,
    ) -> Result<bool, PipelineError> {
        let doc_id = result.filing_doc_id();
        match self.text_store.put(key, content, encode_metadata(result)).await {
            Ok(()) => return Ok(true),
            Err(ObjectStoreError::MetadataTooLarge { size, limit }) => {
                info!(doc_id, size, limit, "Metadata too large, writing metadata object");
            }
            Err(e) => return Err(e.into()),
        }

        let meta = meta_key(result.external_num());
        let fallback = async {
            let body = serde_json::to_vec(result)?;
            self.text_store.put(&meta, &body, Metadata::new()).await?;
            // Text last: its existence is the fence
            self.text_store
                .put(key, content, fallback_metadata(&meta, doc_id))
                .await?;
            Ok::<_, ObjectStoreError>(())
        };

        match fallback.await {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(doc_id, key = %key, meta_key = %meta, "Result left unrecorded: {}", e);
                Ok(false)
            }
        }
    }
}
