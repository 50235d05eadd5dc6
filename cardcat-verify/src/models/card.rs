//! Extracted card input
//!
//! One `ExtractedCard` is produced per scan by the vision extractor and is
//! never mutated afterwards. Model output is loosely shaped, so every field
//! defaults when absent and `year` accepts either a number or a string.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Visual cues the extractor observed on the card surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualCues {
    pub border_color: Option<String>,
    /// e.g. "glossy", "matte", "chrome"
    pub surface_finish: Option<String>,
    pub has_foil: bool,
    pub has_refractor_pattern: bool,
    pub serial_number_visible: bool,
    /// e.g. "front bottom right"
    pub serial_number_location: Option<String>,
    pub rookie_logo_visible: bool,
    pub autograph_sticker_visible: bool,
    pub relic_swatch_visible: bool,
}

/// Card attributes as read from a photo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedCard {
    // Identity
    pub player_name: Option<String>,
    pub card_number: Option<String>,
    #[serde(deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    pub sport: Option<String>,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub set_name: Option<String>,
    pub team: Option<String>,

    // Variation
    /// "Base", "Parallel", "Insert", ...
    pub variation_type: Option<String>,
    pub parallel_name: Option<String>,
    /// Serial fraction as printed, e.g. "23/99"
    pub serial_number: Option<String>,
    pub is_numbered: bool,
    pub is_short_print: bool,
    pub is_super_short_print: bool,

    // Special attributes
    pub is_rookie: bool,
    pub is_autograph: bool,
    pub is_relic: bool,

    // Grading
    pub is_graded: bool,
    pub grading_company: Option<String>,
    pub grade: Option<String>,
    pub cert_number: Option<String>,

    pub condition_notes: Option<String>,
    pub visual_cues: Option<VisualCues>,
    pub visible_text: Vec<String>,
}

impl ExtractedCard {
    /// Names of the checklist key fields the extractor failed to supply
    pub fn missing_identity_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if non_blank(&self.manufacturer).is_none() {
            missing.push("manufacturer");
        }
        if non_blank(&self.brand).is_none() {
            missing.push("brand");
        }
        if self.year.is_none() {
            missing.push("year");
        }
        missing
    }

    pub fn has_identity(&self) -> bool {
        self.missing_identity_fields().is_empty()
    }

    /// Parallel name, if one was extracted
    pub fn parallel(&self) -> Option<&str> {
        non_blank(&self.parallel_name)
    }

    pub fn card_number(&self) -> Option<&str> {
        non_blank(&self.card_number)
    }

    pub fn player(&self) -> Option<&str> {
        non_blank(&self.player_name)
    }

    /// True when the variation type reads "Base"
    pub fn is_base(&self) -> bool {
        non_blank(&self.variation_type)
            .map(|v| v.eq_ignore_ascii_case("base"))
            .unwrap_or(false)
    }

    /// "2020 Panini Prizm #88 Justin Jefferson"
    pub fn label(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(year) = self.year {
            parts.push(year.to_string());
        }
        for field in [&self.manufacturer, &self.brand] {
            if let Some(value) = non_blank(field) {
                parts.push(value.to_string());
            }
        }
        if let Some(number) = self.card_number() {
            parts.push(format!("#{}", number.trim_start_matches('#')));
        }
        if let Some(player) = self.player() {
            parts.push(player.to_string());
        }

        if parts.is_empty() {
            "unidentified card".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YearRepr {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<YearRepr>::deserialize(deserializer)? {
        Some(YearRepr::Number(n)) => i32::try_from(n).ok(),
        // "2020-21" season strings resolve to their first year
        Some(YearRepr::Text(s)) => s
            .trim()
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 4)
            .and_then(|part| part.parse().ok()),
        None => None,
    })
}

/// Result of a full extraction call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOutcome {
    pub card: ExtractedCard,
    /// Extractor's own per-field confidence hints in [0, 1]
    pub field_hints: HashMap<String, f64>,
}

/// Image bytes sent to the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct CardImage {
    pub data: Vec<u8>,
    /// MIME type, e.g. "image/jpeg"
    pub media_type: String,
}

impl CardImage {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }

    pub fn from_base64(encoded: &str, media_type: impl Into<String>) -> Result<Self, base64::DecodeError> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::new(data, media_type))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}
