//! Service layer for cardcat-verify

pub mod confirmation;
pub mod extractor;
pub mod learning;
pub mod scan_pipeline;
pub mod verifier;

pub use confirmation::{needs_confirmation, run_confirmation_pass, ConfirmationError};
pub use extractor::{Extractor, ExtractorError, HttpExtractor};
pub use learning::{spawn_learning_worker, CardSaved, ChecklistLearner, LearningQueue};
pub use scan_pipeline::{BatchItem, BatchScanner, CardPipeline, PipelineOptions, ScanError};
pub use verifier::CardVerifier;
