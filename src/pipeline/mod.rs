//! The extraction task pipeline.
//!
//! ```text
//! Injector -> work queue -> ExtractionWorker -> text bucket (+ results queue)
//!                                                  |              |
//!                                           BatchCollector  ResultCollector
//!                                                  \              /
//!                                                 DocumentUpdater -> database
//! ```
//!
//! Delivery is at-least-once throughout. Idempotency comes from two fences:
//! the text artifact's existence (extraction) and the document's `public`
//! status (convergence).

pub mod artifact;
mod batch;
mod collect;
mod converge;
mod error;
mod extract;
mod inject;
pub mod tool;

pub use batch::BatchCollector;
pub use collect::{CollectSummary, ResultCollector};
pub use converge::{build_pages, DocumentUpdater};
pub use error::{ConvergeError, PipelineError};
pub use extract::{ExtractOutcome, ExtractSummary, ExtractionWorker};
pub use inject::{InjectSummary, Injector};
pub use tool::ExtractionTool;
