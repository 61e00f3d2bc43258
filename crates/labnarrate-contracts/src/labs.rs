//! Lab documents as stored by the content layer.
//!
//! The narration pipeline reads the descriptive fields and writes back only the
//! `narration*` fields on media and `aiNarration`/`narrationSource` on the lab. Fields this
//! crate does not model are kept in `extra` so a load/save round trip is lossless.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::narration::{BackendKind, ConfidenceLevel, NarrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Gif,
    Image,
}

impl MediaKind {
    /// Maps a stored `type` value to the extraction path. Anything that is not a video or a
    /// GIF (`screenshot`, `png`, unknown values) is treated as a still image.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "video" => MediaKind::Video,
            "gif" => MediaKind::Gif,
            _ => MediaKind::Image,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Gif => "gif",
            MediaKind::Image => "image",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "gif" => Ok(MediaKind::Gif),
            "image" => Ok(MediaKind::Image),
            other => Err(format!("unknown media kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    #[default]
    Draft,
    Published,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    pub url: String,
    /// The stored `type` value, kept verbatim so write-back does not normalize it.
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_confidence: Option<ConfidenceLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_source: Option<BackendKind>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaAsset {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            media_type: kind.as_str().to_string(),
            caption: None,
            narration: None,
            narration_confidence: None,
            narration_source: None,
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::classify(&self.media_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub media: Vec<MediaAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_narration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_source: Option<BackendKind>,
    #[serde(default)]
    pub status: LabStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One narrated asset, keyed by its index in `Lab::media`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaNarration {
    pub media_index: usize,
    pub result: NarrationResult,
}

impl Lab {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading lab document {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid lab document {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Steps with blank entries removed.
    pub fn meaningful_steps(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .map(String::as_str)
            .map(str::trim)
            .filter(|step| !step.is_empty())
    }

    /// Writes narration results back onto the document. Indices past the end are ignored.
    pub fn apply_narration(&mut self, media: &[MediaNarration], summary: &NarrationResult) {
        for row in media {
            let Some(asset) = self.media.get_mut(row.media_index) else {
                continue;
            };
            asset.narration = Some(row.result.narration_text.clone());
            asset.narration_confidence = Some(row.result.overall_confidence);
            asset.narration_source = Some(row.result.source);
        }
        self.ai_narration = Some(summary.narration_text.clone());
        self.narration_source = Some(summary.source);
    }
}
