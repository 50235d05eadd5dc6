//! Confirmation pass
//!
//! When the initial verification is inconclusive, the extractor is asked a
//! short list of targeted questions about the same images. The answer is
//! parsed into `ConfirmationResponse` and merged back into the result. Any
//! failure (extractor error, unparseable answer, timeout, cancellation)
//! leaves the initial result in place plus a single warning.

use crate::models::verification::fields;
use crate::models::{CardImage, Confidence, ExtractedCard, VerificationResult};
use crate::services::extractor::{Extractor, ExtractorError};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Warning recorded when the re-ask could not be used
pub const CONFIRMATION_FAILED_WARNING: &str =
    "Confirmation pass failed — using initial scan results";

/// Reason set on a parallel field upgraded by the re-ask
pub const CONFIRMED_REASON: &str = "confirmed by targeted re-ask";

#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("Extractor failed: {0}")]
    Extractor(#[from] ExtractorError),

    #[error("Unusable confirmation response: {0}")]
    Parse(String),

    #[error("Confirmation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Confirmation cancelled")]
    Cancelled,
}

/// True when the result warrants a second look
pub fn needs_confirmation(result: &VerificationResult) -> bool {
    result.overall_confidence.is_inconclusive()
        || !result.suggestions.is_empty()
        || result.has_conflict()
}

/// Which axes the re-ask covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub ask_variation: bool,
    pub ask_player: bool,
    pub ask_serial: bool,
    pub ask_surface_finish: bool,
    pub ask_border_color: bool,
    pub current_parallel: Option<String>,
    pub suggested_variation: Option<String>,
    pub suggested_player: Option<String>,
}

impl ConfirmationRequest {
    pub fn from_result(card: &ExtractedCard, result: &VerificationResult) -> Self {
        let ask_variation = result
            .field(fields::PARALLEL)
            .map(|f| f.confidence.is_inconclusive())
            .unwrap_or(false);

        Self {
            ask_variation,
            ask_player: result.suggested_player_name.is_some(),
            ask_serial: result.warning_mentions("serial"),
            ask_surface_finish: result.warning_mentions("foil") || result.warning_mentions("refractor"),
            ask_border_color: true,
            current_parallel: card.parallel().map(str::to_string),
            suggested_variation: result.suggested_variation.clone(),
            suggested_player: result.suggested_player_name.clone(),
        }
    }
}

/// Prompt text for a request
pub fn build_prompt(request: &ConfirmationRequest, card: &ExtractedCard) -> String {
    let mut questions: Vec<String> = Vec::new();

    if request.ask_variation {
        let mut q = String::from(
            "What parallel or variation is this card? Look at the border color, finish and any pattern.",
        );
        if let Some(current) = &request.current_parallel {
            q.push_str(&format!(" It was first read as \"{}\".", current));
        }
        if let Some(suggested) = &request.suggested_variation {
            q.push_str(&format!(" Could it be \"{}\"?", suggested));
        }
        questions.push(q);
    }

    if request.ask_player {
        let mut q = format!(
            "Read the player name printed on the card exactly. It was first read as \"{}\".",
            card.player().unwrap_or("unknown")
        );
        if let Some(suggested) = &request.suggested_player {
            q.push_str(&format!(" The checklist says \"{}\".", suggested));
        }
        questions.push(q);
    }

    if request.ask_serial {
        questions.push(
            "Is the card serial numbered (e.g. 23/99)? If so, read the serial number exactly."
                .to_string(),
        );
    }

    if request.ask_surface_finish {
        questions.push(
            "Describe the surface finish: plain, foil, refractor, prizm, or other.".to_string(),
        );
    }

    if request.ask_border_color {
        questions.push("What color is the card border?".to_string());
    }

    let numbered: Vec<String> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect();

    format!(
        "You are re-checking a trading card ({}). Answer only these questions:\n{}\n\n\
         Respond with a single JSON object and nothing else, using null for anything you cannot see:\n\
         {{\"variation\": string|null, \"playerName\": string|null, \"isNumbered\": \"yes\"|\"no\"|null, \
         \"serialNumber\": string|null, \"surfaceFinish\": string|null, \"borderColor\": string|null}}",
        card.label(),
        numbered.join("\n")
    )
}

/// Parsed re-ask answer
///
/// Every field is optional. Blank strings and placeholder words such as
/// "null" or "unknown" count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmationResponse {
    #[serde(alias = "parallel", alias = "parallelName")]
    pub variation: Option<String>,
    pub player_name: Option<String>,
    #[serde(deserialize_with = "lenient_yes_no")]
    pub is_numbered: Option<String>,
    pub serial_number: Option<String>,
    pub surface_finish: Option<String>,
    pub border_color: Option<String>,
}

impl ConfirmationResponse {
    pub fn variation(&self) -> Option<&str> {
        present(&self.variation)
    }

    pub fn player_name(&self) -> Option<&str> {
        present(&self.player_name)
    }

    pub fn serial_number(&self) -> Option<&str> {
        present(&self.serial_number)
    }

    pub fn is_numbered(&self) -> bool {
        present(&self.is_numbered)
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false)
    }

    pub fn surface_finish(&self) -> Option<&str> {
        present(&self.surface_finish)
    }

    pub fn border_color(&self) -> Option<&str> {
        present(&self.border_color)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    let value = value.as_deref()?.trim();
    if value.is_empty()
        || ["null", "none", "unknown", "n/a"]
            .iter()
            .any(|p| value.eq_ignore_ascii_case(p))
    {
        None
    } else {
        Some(value)
    }
}

fn lenient_yes_no<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YesNo {
        Flag(bool),
        Text(String),
    }

    Ok(match Option::<YesNo>::deserialize(deserializer)? {
        Some(YesNo::Flag(true)) => Some("yes".to_string()),
        Some(YesNo::Flag(false)) => Some("no".to_string()),
        Some(YesNo::Text(s)) => Some(s),
        None => None,
    })
}

/// Parse a raw model answer
///
/// Tolerates code fences and prose around the object: the text between the
/// first `{` and the last `}` is parsed.
pub fn parse_confirmation_response(raw: &str) -> Result<ConfirmationResponse, ConfirmationError> {
    let start = raw.find('{');
    let end = raw.rfind('}');

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            return Err(ConfirmationError::Parse(
                "no JSON object in response".to_string(),
            ))
        }
    };

    serde_json::from_str(json).map_err(|e| ConfirmationError::Parse(e.to_string()))
}

/// Fold a confirmation answer into the result and recompute overall
pub fn merge_confirmation(result: &mut VerificationResult, response: &ConfirmationResponse) {
    if let Some(variation) = response.variation() {
        result.suggested_variation = Some(variation.to_string());
        result
            .suggestions
            .retain(|s| !s.to_lowercase().contains("parallel"));
        result
            .suggestions
            .push(format!("Parallel confirmed on re-ask as '{}'", variation));

        if let Some(field) = result.field_mut(fields::PARALLEL) {
            if field.confidence.is_inconclusive() {
                field.confidence = Confidence::Medium;
                field.reason = CONFIRMED_REASON.to_string();
            }
        }
    }

    if let Some(player) = response.player_name() {
        result.suggested_player_name = Some(player.to_string());
    }

    if response.is_numbered() {
        if let Some(serial) = response.serial_number() {
            result
                .suggestions
                .push(format!("Serial number read on re-ask: {}", serial));
        }
    }

    tracing::debug!(
        surface_finish = ?response.surface_finish(),
        border_color = ?response.border_color(),
        "Confirmation answer merged"
    );

    result.recompute_overall();
}

async fn ask(
    extractor: &dyn Extractor,
    image: &CardImage,
    back: Option<&CardImage>,
    prompt: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ConfirmationResponse, ConfirmationError> {
    let raw = tokio::select! {
        _ = cancel.cancelled() => return Err(ConfirmationError::Cancelled),
        answer = tokio::time::timeout(timeout, extractor.send_prompt(image, prompt, back)) => {
            answer.map_err(|_| ConfirmationError::Timeout(timeout))??
        }
    };

    parse_confirmation_response(&raw)
}

/// Run the re-ask and merge it, degrading to a warning on any failure
///
/// Returns true when the answer was merged.
pub async fn run_confirmation_pass(
    extractor: &dyn Extractor,
    image: &CardImage,
    back: Option<&CardImage>,
    card: &ExtractedCard,
    result: &mut VerificationResult,
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    let request = ConfirmationRequest::from_result(card, result);
    let prompt = build_prompt(&request, card);

    match ask(extractor, image, back, &prompt, timeout, cancel).await {
        Ok(response) => {
            merge_confirmation(result, &response);
            tracing::info!(
                card = %card.label(),
                source = extractor.source_id(),
                overall = %result.overall_confidence,
                "Confirmation pass merged"
            );
            true
        }
        Err(e) => {
            tracing::warn!(card = %card.label(), error = %e, "Confirmation pass failed");
            result.warnings.push(CONFIRMATION_FAILED_WARNING.to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldConfidence;

    fn inconclusive_result() -> VerificationResult {
        let mut result = VerificationResult {
            checklist_match: true,
            suggested_player_name: Some("Justin Jefferson".to_string()),
            suggestions: vec!["Parallel: did you mean 'Silver'? (86% match)".to_string()],
            warnings: vec!["Serial number visible but card not marked as numbered".to_string()],
            ..Default::default()
        };
        result.push_field(FieldConfidence::new(fields::CARD_NUMBER, "88", Confidence::High, "found"));
        result.push_field(FieldConfidence::new(fields::PARALLEL, "Silverr", Confidence::Conflict, "unknown"));
        result.recompute_overall();
        result
    }

    #[test]
    fn test_needs_confirmation() {
        assert!(needs_confirmation(&inconclusive_result()));
        assert!(needs_confirmation(&VerificationResult::default()));

        let clean = VerificationResult {
            overall_confidence: Confidence::High,
            ..Default::default()
        };
        assert!(!needs_confirmation(&clean));
    }

    #[test]
    fn test_request_targets_ambiguous_axes() {
        let card = ExtractedCard {
            parallel_name: Some("Silverr".to_string()),
            ..Default::default()
        };
        let request = ConfirmationRequest::from_result(&card, &inconclusive_result());
        assert!(request.ask_variation);
        assert!(request.ask_player);
        assert!(request.ask_serial);
        assert!(!request.ask_surface_finish);
        assert!(request.ask_border_color);

        let prompt = build_prompt(&request, &card);
        assert!(prompt.contains("Silverr"));
        assert!(prompt.contains("serial"));
        assert!(prompt.contains("\"borderColor\""));
        assert!(!prompt.contains("surface finish"));
    }

    #[test]
    fn test_parse_tolerates_fences_and_prose() {
        let raw = "Sure! Here is what I see:\n```json\n{\"variation\": \"Silver\", \"isNumbered\": true, \"serialNumber\": \"23/99\"}\n```\nHope that helps.";
        let response = parse_confirmation_response(raw).unwrap();
        assert_eq!(response.variation(), Some("Silver"));
        assert!(response.is_numbered());
        assert_eq!(response.serial_number(), Some("23/99"));
        assert_eq!(response.player_name(), None);
    }

    #[test]
    fn test_parse_placeholders_are_absent() {
        let response =
            parse_confirmation_response(r#"{"variation": "unknown", "playerName": "  ", "isNumbered": "no"}"#)
                .unwrap();
        assert_eq!(response.variation(), None);
        assert_eq!(response.player_name(), None);
        assert!(!response.is_numbered());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_confirmation_response("I can't tell from this photo."),
            Err(ConfirmationError::Parse(_))
        ));
        assert!(matches!(
            parse_confirmation_response("{ variation: Silver }"),
            Err(ConfirmationError::Parse(_))
        ));
    }

    #[test]
    fn test_merge_upgrades_parallel_and_replaces_suggestion() {
        let mut result = inconclusive_result();
        assert_eq!(result.overall_confidence, Confidence::Conflict);

        let response = ConfirmationResponse {
            variation: Some("Silver".to_string()),
            player_name: Some("Justin Jefferson".to_string()),
            is_numbered: Some("yes".to_string()),
            serial_number: Some("23/99".to_string()),
            ..Default::default()
        };
        merge_confirmation(&mut result, &response);

        let parallel = result.field(fields::PARALLEL).unwrap();
        assert_eq!(parallel.confidence, Confidence::Medium);
        assert_eq!(parallel.reason, CONFIRMED_REASON);
        assert_eq!(result.suggested_variation.as_deref(), Some("Silver"));
        assert_eq!(
            result
                .suggestions
                .iter()
                .filter(|s| s.to_lowercase().contains("parallel"))
                .count(),
            1
        );
        assert!(result.suggestions.iter().any(|s| s.contains("23/99")));
        // High + Medium with a checklist match
        assert_eq!(result.overall_confidence, Confidence::High);
    }

    #[test]
    fn test_merge_empty_response_changes_nothing_but_overall() {
        let mut result = inconclusive_result();
        let before = result.clone();
        merge_confirmation(&mut result, &ConfirmationResponse::default());
        assert_eq!(result, before);
    }
}
