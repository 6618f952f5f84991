//! Queue message records.
//!
//! Work messages flow from the injector to extraction workers; result
//! messages flow from workers to the collector. Both are serialized as JSON.

use serde::{Deserialize, Serialize};

/// A request to extract one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub filing_doc_id: i64,
    pub external_num: String,
    pub source_url: String,
}

/// Byte range of one page inside the concatenated text artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageIndex {
    pub number: u32,
    pub size: u64,
    pub offset: u64,
}

impl PageIndex {
    /// Exclusive end offset, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}

/// Outcome of extracting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultMessage {
    Public {
        filing_doc_id: i64,
        external_num: String,
        page_count: u32,
        content_key: String,
        pages: Vec<PageIndex>,
    },
    Failed {
        filing_doc_id: i64,
        external_num: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ResultMessage {
    pub fn failed(work: &WorkMessage, reason: impl Into<String>) -> Self {
        ResultMessage::Failed {
            filing_doc_id: work.filing_doc_id,
            external_num: work.external_num.clone(),
            reason: Some(reason.into()),
        }
    }

    pub fn filing_doc_id(&self) -> i64 {
        match self {
            ResultMessage::Public { filing_doc_id, .. }
            | ResultMessage::Failed { filing_doc_id, .. } => *filing_doc_id,
        }
    }

    pub fn external_num(&self) -> &str {
        match self {
            ResultMessage::Public { external_num, .. }
            | ResultMessage::Failed { external_num, .. } => external_num,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, ResultMessage::Public { .. })
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            ResultMessage::Public { .. } => "public",
            ResultMessage::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_wire_format_is_tagged_by_status() {
        let msg = ResultMessage::Public {
            filing_doc_id: 7,
            external_num: "6017".to_string(),
            page_count: 1,
            content_key: "text/6017.txt".to_string(),
            pages: vec![PageIndex {
                number: 1,
                size: 2,
                offset: 0,
            }],
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"], "public");
        assert_eq!(json["pages"][0]["size"], 2);

        let failed: ResultMessage =
            serde_json::from_str(r#"{"status":"failed","filing_doc_id":3,"external_num":"x"}"#)
                .unwrap();
        assert_eq!(failed.filing_doc_id(), 3);
        assert!(!failed.is_public());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let parsed: Result<ResultMessage, _> =
            serde_json::from_str(r#"{"status":"queued","filing_doc_id":3,"external_num":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_page_end_detects_overflow() {
        let page = PageIndex {
            number: 1,
            size: u64::MAX,
            offset: 1,
        };
        assert_eq!(page.end(), None);
    }
}
