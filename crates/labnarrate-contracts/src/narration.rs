use std::fmt;

use serde::{Deserialize, Serialize};

/// Confidence attached to a narration claim. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn weight(self) -> u32 {
        match self {
            ConfidenceLevel::High => 3,
            ConfidenceLevel::Medium => 2,
            ConfidenceLevel::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a narration came from. Provenance only, never used for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "on-device", alias = "foundry")]
    OnDevice,
    #[serde(rename = "browser")]
    BrowserEmbedded,
    #[serde(rename = "remote")]
    Remote,
    #[serde(rename = "cloud")]
    CloudProxy,
    #[serde(rename = "text")]
    TextOnly,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::OnDevice => "on-device",
            BackendKind::BrowserEmbedded => "browser",
            BackendKind::Remote => "remote",
            BackendKind::CloudProxy => "cloud",
            BackendKind::TextOnly => "text",
        }
    }

    /// Human label used in progress messages.
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::OnDevice => "on-device AI",
            BackendKind::BrowserEmbedded => "embedded AI",
            BackendKind::Remote => "remote AI",
            BackendKind::CloudProxy => "cloud AI",
            BackendKind::TextOnly => "text-only narration",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub text: String,
    pub confidence: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationResult {
    pub narration_text: String,
    pub segments: Vec<NarrationSegment>,
    pub overall_confidence: ConfidenceLevel,
    pub source: BackendKind,
}

impl NarrationResult {
    /// Builds a result whose overall confidence is derived from the parsed segments.
    pub fn from_raw(raw: impl Into<String>, source: BackendKind) -> Self {
        let narration_text = raw.into();
        let segments = crate::confidence::parse_segments(&narration_text);
        let overall_confidence = crate::confidence::score_overall(&segments);
        Self {
            narration_text,
            segments,
            overall_confidence,
            source,
        }
    }
}
