use std::sync::Arc;

use labnarrate_contracts::confidence::tag_unmarked_lines;
use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::narration::{BackendKind, ConfidenceLevel};

use super::{prompts, AnalysisBackend};
use crate::embedded::EmbeddedModel;
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

/// Metadata-only narration from the embedded model. Frames are ignored: the model has no vision.
pub struct EmbeddedBackend {
    model: Arc<dyn EmbeddedModel>,
}

impl EmbeddedBackend {
    pub fn new(model: Arc<dyn EmbeddedModel>) -> Self {
        Self { model }
    }
}

impl AnalysisBackend for EmbeddedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::BrowserEmbedded
    }

    fn analyze(
        &self,
        _frames: &[ExtractedFrame],
        lab: &Lab,
        _model_hint: Option<&str>,
    ) -> Result<String, NarrationError> {
        let raw = self.model.prompt(
            prompts::METADATA_NARRATOR_SYSTEM,
            &prompts::metadata_narrator_user(lab),
        )?;
        Ok(tag_unmarked_lines(&raw, ConfidenceLevel::High))
    }

    fn suggest(&self, field: &str, partial: &str, context: &str) -> Result<String, NarrationError> {
        self.model.prompt(
            prompts::SUGGESTION_SYSTEM,
            &prompts::suggestion_user(field, partial, context),
        )
    }
}
