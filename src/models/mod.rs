//! Domain models shared by the pipeline stages.

mod document;
mod message;

pub use document::{count_words, Document, DocumentStatus, Page};
pub use message::{PageIndex, ResultMessage, WorkMessage};
