//! filingtext - distributed text extraction for PDF filings.
//!
//! Documents move `new -> queued -> public | failed`. The injector hands work
//! to extraction workers over a queue; workers store page text in an object
//! store; collectors fold results back into the database.

pub mod cli;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod schema;
pub mod storage;
