//! Diesel ORM models for database tables.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};

use crate::models::{Document, DocumentStatus, Page};
use crate::schema;

use super::util::parse_timestamp;

/// Document record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: i64,
    pub external_num: String,
    pub source_url: String,
    pub status: String,
    pub page_count: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<DocumentRecord> for Document {
    type Error = diesel::result::Error;

    fn try_from(record: DocumentRecord) -> Result<Self, Self::Error> {
        let status = DocumentStatus::from_str(&record.status).ok_or_else(|| {
            super::util::to_diesel_error(format!(
                "document {} has unknown status '{}'",
                record.id, record.status
            ))
        })?;
        Ok(Document {
            id: record.id,
            external_num: record.external_num,
            source_url: record.source_url,
            status,
            page_count: record.page_count.map(|c| c as u32),
            created_at: parse_timestamp(&record.created_at),
            updated_at: parse_timestamp(&record.updated_at),
        })
    }
}

/// New document for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::documents)]
pub struct NewDocument<'a> {
    pub external_num: &'a str,
    pub source_url: &'a str,
    pub status: &'a str,
    pub page_count: Option<i32>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Page record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::pages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PageRecord {
    pub id: i64,
    pub document_id: i64,
    pub page_number: i32,
    pub text: String,
    pub word_count: i32,
}

impl From<PageRecord> for Page {
    fn from(record: PageRecord) -> Self {
        Page {
            document_id: record.document_id,
            page_number: record.page_number as u32,
            text: record.text,
            word_count: record.word_count as u32,
        }
    }
}

/// New page for insertion. Owned so it can move into a transaction future.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = schema::pages)]
pub struct NewPage {
    pub document_id: i64,
    pub page_number: i32,
    pub text: String,
    pub word_count: i32,
}

impl TryFrom<Page> for NewPage {
    type Error = diesel::result::Error;

    /// Fails instead of wrapping when a number exceeds the column range.
    fn try_from(page: Page) -> Result<Self, Self::Error> {
        let column = |field: &str, value: u32| {
            i32::try_from(value).map_err(|_| {
                super::util::to_diesel_error(format!(
                    "{} {} of document {} exceeds the column range",
                    field, value, page.document_id
                ))
            })
        };
        Ok(NewPage {
            document_id: page.document_id,
            page_number: column("page_number", page.page_number)?,
            word_count: column("word_count", page.word_count)?,
            text: page.text,
        })
    }
}

/// Row returned by the injector's claim statement.
#[derive(QueryableByName, Debug, Clone)]
pub struct ClaimedDocumentRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub external_num: String,
    #[diesel(sql_type = Text)]
    pub source_url: String,
}

/// Queue record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::queues)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueRecord {
    pub name: String,
    pub created_at: String,
}

/// Queue message row returned by the receive claim statement.
#[derive(QueryableByName, Debug, Clone)]
pub struct ClaimedMessageRow {
    #[diesel(sql_type = Text)]
    pub id: String,
    #[diesel(sql_type = Text)]
    pub body: String,
}

/// New queue message for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::queue_messages)]
pub struct NewQueueMessage<'a> {
    pub id: &'a str,
    pub queue_name: &'a str,
    pub body: &'a str,
    pub visible_at: &'a str,
    pub receive_count: i32,
    pub created_at: &'a str,
}
