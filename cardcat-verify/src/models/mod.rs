//! Data models for cardcat-verify
//!
//! - Extracted card input as produced by the vision extractor
//! - Verification output (per-field and overall confidence)
//! - Reference corpus entities (checklists, missing-checklist tracker)

pub mod card;
pub mod checklist;
pub mod verification;

pub use card::{CardImage, ExtractedCard, ScanOutcome, VisualCues};
pub use checklist::{
    ChecklistCard, ChecklistKey, ChecklistSummary, DataSource, MissingChecklist, SetChecklist,
};
pub use verification::{Confidence, FieldConfidence, VerificationResult};
