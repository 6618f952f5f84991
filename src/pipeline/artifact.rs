//! Object keys and metadata encoding for extraction artifacts.
//!
//! Text bucket layout:
//! - `text/<external_num>.txt`: concatenated page text. Its existence is the
//!   extraction fence.
//! - `meta/<external_num>.json`: the full `ResultMessage`, written only when
//!   the inline metadata would exceed the store's ceiling.
//!
//! Image bucket layout: `<external_num>/page-<n>.jpg`.

use thiserror::Error;

use crate::models::{PageIndex, ResultMessage};
use crate::storage::{Metadata, ObjectStore, ObjectStoreError};

pub const TEXT_PREFIX: &str = "text/";
pub const META_PREFIX: &str = "meta/";

const KEY_FILING_DOC_ID: &str = "filing_doc_id";
const KEY_EXTERNAL_NUM: &str = "external_num";
const KEY_STATUS: &str = "status";
const KEY_PAGE_COUNT: &str = "page_count";
const KEY_CONTENT_KEY: &str = "content_key";
const KEY_META_KEY: &str = "meta_key";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("metadata field {0} is missing")]
    MissingField(String),
    #[error("metadata field {field} has invalid value {value:?}")]
    InvalidField { field: String, value: String },
    #[error("artifact status {0:?} is not public")]
    NotPublic(String),
    #[error("metadata object is not a valid result: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn text_key(external_num: &str) -> String {
    format!("{}{}.txt", TEXT_PREFIX, external_num)
}

pub fn meta_key(external_num: &str) -> String {
    format!("{}{}.json", META_PREFIX, external_num)
}

pub fn image_key(external_num: &str, page_number: u32) -> String {
    format!("{}/page-{}.jpg", external_num, page_number)
}

pub fn image_metadata() -> Metadata {
    Metadata::from([("content-type".to_string(), "image/jpeg".to_string())])
}

/// Why a stored text artifact could not be turned back into a result.
#[derive(Debug, Error)]
pub enum DescribeError {
    #[error("metadata object {0} is missing")]
    MissingMetaObject(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// How a text artifact describes its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredDescription {
    /// The full result is carried in the inline metadata.
    Inline(ResultMessage),
    /// The result lives in a separate metadata object.
    MetaRef(String),
}

/// Inline metadata for a public result: the result fields plus one
/// `page.<i>.<field>` entry per page index field.
pub fn encode_metadata(result: &ResultMessage) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(
        KEY_FILING_DOC_ID.to_string(),
        result.filing_doc_id().to_string(),
    );
    meta.insert(KEY_EXTERNAL_NUM.to_string(), result.external_num().to_string());
    meta.insert(KEY_STATUS.to_string(), result.status_str().to_string());

    if let ResultMessage::Public {
        page_count,
        content_key,
        pages,
        ..
    } = result
    {
        meta.insert(KEY_PAGE_COUNT.to_string(), page_count.to_string());
        meta.insert(KEY_CONTENT_KEY.to_string(), content_key.clone());
        for (i, page) in pages.iter().enumerate() {
            meta.insert(format!("page.{}.number", i), page.number.to_string());
            meta.insert(format!("page.{}.size", i), page.size.to_string());
            meta.insert(format!("page.{}.offset", i), page.offset.to_string());
        }
    }
    meta
}

/// Metadata for a text artifact whose description was moved to `meta_key`.
pub fn fallback_metadata(meta_key: &str, filing_doc_id: i64) -> Metadata {
    Metadata::from([
        (KEY_META_KEY.to_string(), meta_key.to_string()),
        (KEY_FILING_DOC_ID.to_string(), filing_doc_id.to_string()),
    ])
}

fn field<'a>(meta: &'a Metadata, name: &str) -> Result<&'a str, ArtifactError> {
    meta.get(name)
        .map(String::as_str)
        .ok_or_else(|| ArtifactError::MissingField(name.to_string()))
}

fn parsed<T: std::str::FromStr>(meta: &Metadata, name: &str) -> Result<T, ArtifactError> {
    let value = field(meta, name)?;
    value.trim().parse().map_err(|_| ArtifactError::InvalidField {
        field: name.to_string(),
        value: value.to_string(),
    })
}

/// Read back what `encode_metadata` or `fallback_metadata` wrote.
pub fn decode_metadata(meta: &Metadata) -> Result<StoredDescription, ArtifactError> {
    if let Some(meta_key) = meta.get(KEY_META_KEY) {
        return Ok(StoredDescription::MetaRef(meta_key.clone()));
    }

    let status = field(meta, KEY_STATUS)?;
    if status != "public" {
        return Err(ArtifactError::NotPublic(status.to_string()));
    }

    let page_count: u32 = parsed(meta, KEY_PAGE_COUNT)?;
    let pages = (0..page_count)
        .map(|i| {
            Ok(PageIndex {
                number: parsed(meta, &format!("page.{}.number", i))?,
                size: parsed(meta, &format!("page.{}.size", i))?,
                offset: parsed(meta, &format!("page.{}.offset", i))?,
            })
        })
        .collect::<Result<Vec<_>, ArtifactError>>()?;

    Ok(StoredDescription::Inline(ResultMessage::Public {
        filing_doc_id: parsed(meta, KEY_FILING_DOC_ID)?,
        external_num: field(meta, KEY_EXTERNAL_NUM)?.to_string(),
        page_count,
        content_key: field(meta, KEY_CONTENT_KEY)?.to_string(),
        pages,
    }))
}

/// Parse a metadata-only object.
pub fn decode_meta_object(body: &[u8]) -> Result<ResultMessage, ArtifactError> {
    Ok(serde_json::from_slice(body)?)
}

/// Rebuild the result a worker recorded for the text artifact at `key`,
/// following the back-reference to a metadata object when present.
///
/// `None` if the artifact does not exist.
pub async fn describe_artifact(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<ResultMessage>, DescribeError> {
    let Some(metadata) = store.head(key).await? else {
        return Ok(None);
    };

    match decode_metadata(&metadata)? {
        StoredDescription::Inline(result) => Ok(Some(result)),
        StoredDescription::MetaRef(meta_key) => match store.get(&meta_key).await {
            Ok(object) => Ok(Some(decode_meta_object(&object.body)?)),
            Err(ObjectStoreError::NotFound { .. }) => {
                Err(DescribeError::MissingMetaObject(meta_key))
            }
            Err(e) => Err(e.into()),
        },
    }
}
