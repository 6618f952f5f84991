//! Document models for the extraction lifecycle.
//!
//! A document moves `new -> queued -> public | failed`. Only the injector
//! moves rows into `queued`; only the convergence routine moves them out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    New,
    Queued,
    Public,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [Self::New, Self::Queued, Self::Public, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Queued => "queued",
            Self::Public => "public",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "queued" => Some(Self::Queued),
            "public" => Some(Self::Public),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A filing document tracked through extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Database row ID (the `filing_doc_id` carried by messages).
    pub id: i64,
    /// Identifier assigned by the filing system; names the stored artifacts.
    pub external_num: String,
    /// Where the PDF can be downloaded from.
    pub source_url: String,
    pub status: DocumentStatus,
    /// Number of pages, known once the document is public.
    pub page_count: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub document_id: i64,
    pub page_number: u32,
    pub text: String,
    pub word_count: u32,
}

impl Page {
    /// Build a page record, deriving the word count from the text.
    pub fn new(document_id: i64, page_number: u32, text: String) -> Self {
        let word_count = count_words(&text);
        Self {
            document_id,
            page_number,
            text,
            word_count,
        }
    }
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
