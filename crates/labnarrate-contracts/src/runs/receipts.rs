use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::labs::MediaKind;
use crate::narration::{BackendKind, ConfidenceLevel, NarrationResult};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    LowConfidence,
    Failed,
    Skipped,
}

/// One backend invocation made while narrating a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAttempt {
    pub backend: BackendKind,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendAttempt {
    pub fn accepted(backend: BackendKind, confidence: ConfidenceLevel) -> Self {
        Self {
            backend,
            outcome: AttemptOutcome::Accepted,
            confidence: Some(confidence),
            error: None,
        }
    }

    pub fn low_confidence(backend: BackendKind) -> Self {
        Self {
            backend,
            outcome: AttemptOutcome::LowConfidence,
            confidence: Some(ConfidenceLevel::Low),
            error: None,
        }
    }

    pub fn failed(backend: BackendKind, error: impl Into<String>) -> Self {
        Self {
            backend,
            outcome: AttemptOutcome::Failed,
            confidence: None,
            error: Some(error.into()),
        }
    }

    pub fn skipped(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self {
            backend,
            outcome: AttemptOutcome::Skipped,
            confidence: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationReceipt {
    pub schema_version: u64,
    pub run_id: String,
    pub lab_title: String,
    pub media_index: usize,
    pub media_url: String,
    pub media_kind: MediaKind,
    pub mode: String,
    pub frame_count: usize,
    pub frame_digest: Option<String>,
    pub attempts: Vec<BackendAttempt>,
    pub result: NarrationResult,
}

impl NarrationReceipt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: &str,
        lab_title: &str,
        media_index: usize,
        media_url: &str,
        media_kind: MediaKind,
        mode: &str,
        frame_count: usize,
        frame_digest: Option<String>,
        attempts: Vec<BackendAttempt>,
        result: NarrationResult,
    ) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            lab_title: lab_title.to_string(),
            media_index,
            media_url: sanitize_media_url(media_url),
            media_kind,
            mode: mode.to_string(),
            frame_count,
            frame_digest,
            attempts,
            result,
        }
    }
}

pub fn write_receipt(path: &Path, receipt: &NarrationReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

/// Inline `data:` URLs are reduced to their media type.
fn sanitize_media_url(url: &str) -> String {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        let header = rest.split(',').next().unwrap_or_default();
        return format!("data:{header},<omitted>");
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        write_receipt, AttemptOutcome, BackendAttempt, NarrationReceipt, RECEIPT_SCHEMA_VERSION,
    };
    use crate::labs::MediaKind;
    use crate::narration::{BackendKind, NarrationResult};

    #[test]
    fn receipt_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("receipts").join("media-00.json");
        let receipt = NarrationReceipt::new(
            "narrate-1",
            "vSAN Cluster Build",
            0,
            "https://cdn.example/run.webm",
            MediaKind::Video,
            "auto",
            3,
            Some("abc123".to_string()),
            vec![
                BackendAttempt::low_confidence(BackendKind::OnDevice),
                BackendAttempt::failed(BackendKind::CloudProxy, "relay returned 502"),
            ],
            NarrationResult::from_raw("Enabled vSAN", BackendKind::TextOnly),
        );
        write_receipt(&path, &receipt)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["media_kind"], json!("video"));
        assert_eq!(parsed["attempts"][0]["outcome"], json!("low_confidence"));
        assert_eq!(parsed["attempts"][1]["backend"], json!("cloud"));
        assert_eq!(parsed["attempts"][1]["error"], json!("relay returned 502"));
        assert_eq!(parsed["result"]["source"], json!("text"));
        assert_eq!(parsed["result"]["overallConfidence"], json!("medium"));
        Ok(())
    }

    #[test]
    fn inline_media_urls_are_not_copied_into_receipts() {
        let receipt = NarrationReceipt::new(
            "narrate-1",
            "lab",
            1,
            "data:image/png;base64,iVBORw0KGgo=",
            MediaKind::Image,
            "text",
            1,
            None,
            vec![BackendAttempt::skipped(BackendKind::OnDevice, "text mode")],
            NarrationResult::from_raw("x", BackendKind::TextOnly),
        );
        assert_eq!(receipt.media_url, "data:image/png;base64,<omitted>");
        assert_eq!(receipt.attempts[0].outcome, AttemptOutcome::Skipped);
    }
}
