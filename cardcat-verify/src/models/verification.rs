//! Verification output
//!
//! A `VerificationResult` is built by the initial checklist pass, optionally
//! amended by the confirmation pass, then handed to the caller unchanged.

use serde::{Deserialize, Serialize};

/// Confidence tier of a field or of the whole card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
    /// Checklist evidence contradicts the extracted value
    Conflict,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
            Confidence::Conflict => "Conflict",
        }
    }

    /// Low or Conflict: the field needs a second look
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Confidence::Low | Confidence::Conflict)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judgement on one extracted field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfidence {
    pub field_name: String,
    pub value: String,
    pub confidence: Confidence,
    pub reason: String,
}

impl FieldConfidence {
    pub fn new(
        field_name: impl Into<String>,
        value: impl Into<String>,
        confidence: Confidence,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
            confidence,
            reason: reason.into(),
        }
    }
}

/// Field names used by the checks
pub mod fields {
    pub const CARD_NUMBER: &str = "cardNumber";
    pub const PLAYER_NAME: &str = "playerName";
    pub const PARALLEL: &str = "parallel";
    pub const GRADING: &str = "grading";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub overall_confidence: Confidence,
    pub field_confidences: Vec<FieldConfidence>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub suggested_variation: Option<String>,
    pub suggested_player_name: Option<String>,
    pub checklist_match: bool,
    pub player_verified: bool,
    pub variation_verified: bool,
    pub card_number_verified: bool,
}

impl Default for VerificationResult {
    fn default() -> Self {
        Self {
            overall_confidence: Confidence::Low,
            field_confidences: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            suggested_variation: None,
            suggested_player_name: None,
            checklist_match: false,
            player_verified: false,
            variation_verified: false,
            card_number_verified: false,
        }
    }
}

impl VerificationResult {
    pub fn push_field(&mut self, field: FieldConfidence) {
        self.field_confidences.push(field);
    }

    pub fn field(&self, name: &str) -> Option<&FieldConfidence> {
        self.field_confidences.iter().find(|f| f.field_name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldConfidence> {
        self.field_confidences.iter_mut().find(|f| f.field_name == name)
    }

    pub fn has_conflict(&self) -> bool {
        self.field_confidences
            .iter()
            .any(|f| f.confidence == Confidence::Conflict)
    }

    /// Case-insensitive search over warnings
    pub fn warning_mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.warnings
            .iter()
            .any(|w| w.to_lowercase().contains(&needle))
    }

    /// Recompute `overall_confidence` from the current field list
    pub fn recompute_overall(&mut self) {
        self.overall_confidence = overall_confidence(&self.field_confidences, self.checklist_match);
    }
}

/// Overall tier as a pure function of the evaluated fields
///
/// Any Conflict wins; otherwise more than half Low gives Low; at least half
/// High with a checklist match gives High; everything else is Medium. With no
/// evaluated fields the checklist match alone decides between Medium and Low.
pub fn overall_confidence(fields: &[FieldConfidence], checklist_match: bool) -> Confidence {
    if fields.is_empty() {
        return if checklist_match {
            Confidence::Medium
        } else {
            Confidence::Low
        };
    }

    if fields.iter().any(|f| f.confidence == Confidence::Conflict) {
        return Confidence::Conflict;
    }

    let total = fields.len();
    let low = fields.iter().filter(|f| f.confidence == Confidence::Low).count();
    let high = fields.iter().filter(|f| f.confidence == Confidence::High).count();

    if low * 2 > total {
        Confidence::Low
    } else if high * 2 >= total && checklist_match {
        Confidence::High
    } else {
        Confidence::Medium
    }
}
