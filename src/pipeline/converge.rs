//! Document update routine shared by the online and batch collectors.
//!
//! Both paths hand a `ResultMessage` (and the text artifact, if any) to
//! `DocumentUpdater::apply`, so the same inputs always produce the same
//! document and page rows.

use tracing::{debug, info};

use super::error::ConvergeError;
use crate::models::{DocumentStatus, Page, PageIndex, ResultMessage};
use crate::repository::{ApplyOutcome, DocumentRepository, Resolution};

/// Rebuild page rows by slicing `content` at each page's byte range.
///
/// Rejects any result that would leave the page set inconsistent with the
/// declared page count.
pub fn build_pages(
    doc_id: i64,
    page_count: u32,
    pages: &[PageIndex],
    content: Option<&[u8]>,
) -> Result<Vec<Page>, ConvergeError> {
    let integrity = |reason: String| ConvergeError::Integrity { doc_id, reason };

    if pages.is_empty() {
        return Err(integrity("public result declares no pages".to_string()));
    }
    // Page counts and numbers are stored as 32-bit integers
    if i32::try_from(page_count).is_err() {
        return Err(integrity(format!("page_count {} is out of range", page_count)));
    }
    if pages.len() != page_count as usize {
        return Err(integrity(format!(
            "page_count is {} but {} pages are indexed",
            page_count,
            pages.len()
        )));
    }

    let total: u64 = pages.iter().map(|p| p.size).sum();
    let content: &[u8] = match content {
        Some(content) => content,
        None if total > 0 => {
            return Err(integrity(format!(
                "{} bytes of pages declared but no content supplied",
                total
            )))
        }
        None => &[],
    };

    let mut seen = std::collections::HashSet::new();
    let mut rows = Vec::with_capacity(pages.len());
    for page in pages {
        if i32::try_from(page.number).is_err() {
            return Err(integrity(format!("page number {} is out of range", page.number)));
        }
        if !seen.insert(page.number) {
            return Err(integrity(format!("page {} is indexed twice", page.number)));
        }

        let end = page
            .end()
            .filter(|end| *end <= content.len() as u64)
            .ok_or_else(|| {
                integrity(format!(
                    "page {} range {}+{} exceeds content length {}",
                    page.number,
                    page.offset,
                    page.size,
                    content.len()
                ))
            })?;

        let bytes = &content[page.offset as usize..end as usize];
        let text = String::from_utf8_lossy(bytes).into_owned();
        let row = Page::new(doc_id, page.number, text);
        if i32::try_from(row.word_count).is_err() {
            return Err(integrity(format!(
                "page {} has {} words, more than can be stored",
                page.number, row.word_count
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Applies results to the document store.
#[derive(Clone)]
pub struct DocumentUpdater {
    documents: DocumentRepository,
}

impl DocumentUpdater {
    pub fn new(documents: DocumentRepository) -> Self {
        Self { documents }
    }

    /// Whether the document is already public, so the caller can skip
    /// fetching content. Unknown documents report `false`.
    pub async fn is_public(&self, doc_id: i64) -> Result<bool, ConvergeError> {
        Ok(self.documents.status_of(doc_id).await? == Some(DocumentStatus::Public))
    }

    /// Apply one result.
    ///
    /// Public documents are left alone, which makes re-delivery and stale
    /// results harmless. A public result replaces the page set and marks the
    /// document public; any other result marks it failed.
    pub async fn apply(
        &self,
        result: &ResultMessage,
        content: Option<&[u8]>,
    ) -> Result<ApplyOutcome, ConvergeError> {
        let doc_id = result.filing_doc_id();

        match self.documents.status_of(doc_id).await? {
            None => return Err(ConvergeError::UnknownDocument(doc_id)),
            Some(DocumentStatus::Public) => {
                debug!(doc_id, "Document already public, ignoring result");
                return Ok(ApplyOutcome::AlreadyPublic);
            }
            Some(_) => {}
        }

        let resolution = match result {
            ResultMessage::Public {
                page_count, pages, ..
            } => Resolution::Publish {
                page_count: *page_count,
                pages: build_pages(doc_id, *page_count, pages, content)?,
            },
            ResultMessage::Failed { .. } => Resolution::Fail,
        };

        let outcome = self
            .documents
            .apply_resolution(doc_id, resolution)
            .await?
            .ok_or(ConvergeError::UnknownDocument(doc_id))?;

        match outcome {
            ApplyOutcome::Published { pages } => {
                info!(doc_id, external_num = result.external_num(), pages, "Document public")
            }
            ApplyOutcome::MarkedFailed => {
                info!(doc_id, external_num = result.external_num(), "Document failed")
            }
            ApplyOutcome::AlreadyPublic => {
                debug!(doc_id, "Document became public concurrently")
            }
        }
        Ok(outcome)
    }
}
