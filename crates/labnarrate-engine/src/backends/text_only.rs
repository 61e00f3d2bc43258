use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::narration::{
    BackendKind, ConfidenceLevel, NarrationResult, NarrationSegment,
};

pub const UNVERIFIED_NOTICE: &str = "⚠️ This narration was generated from written step descriptions only, not from visual analysis of the media. It has not been visually verified.";

/// Deterministic offline narration stitched from the lab's written fields.
///
/// Every part is a `Medium` segment but the overall confidence is pinned to `Low`: nothing here
/// was checked against the media.
pub fn generate_text_only(lab: &Lab) -> NarrationResult {
    let mut parts = vec![format!(
        "In this lab exercise, \"{}\", the objective was to {}.",
        lab.title,
        lab.objective.to_lowercase()
    )];

    let environment = lab.environment.trim();
    if !environment.is_empty() {
        parts.push(format!("The lab environment consisted of {environment}."));
    }

    let steps: Vec<&str> = lab.meaningful_steps().collect();
    if !steps.is_empty() {
        parts.push("\nThe following steps were performed:".to_string());
        parts.extend(
            steps
                .iter()
                .enumerate()
                .map(|(idx, step)| format!("{}. {step}", idx + 1)),
        );
    }

    let outcome = lab.outcome.trim();
    if !outcome.is_empty() {
        parts.push(format!("\nThe outcome: {outcome}"));
    }

    parts.push(format!("\n{UNVERIFIED_NOTICE}"));

    let segments = parts
        .iter()
        .map(|part| NarrationSegment {
            text: part.trim().to_string(),
            confidence: ConfidenceLevel::Medium,
        })
        .collect();

    NarrationResult {
        narration_text: parts.join("\n"),
        segments,
        overall_confidence: ConfidenceLevel::Low,
        source: BackendKind::TextOnly,
    }
}
