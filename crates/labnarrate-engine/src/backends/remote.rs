use labnarrate_contracts::confidence::tag_unmarked_lines;
use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::models::{ModelSelection, ModelSelector, TEXT};
use labnarrate_contracts::narration::{BackendKind, ConfidenceLevel};
use tracing::warn;

use super::chat::{system_message, user_text_message, ChatClient};
use super::{prompts, AnalysisBackend};
use crate::config::{NarrationConfig, RemoteCredential};
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

/// Metadata-only narration through a hosted completion API, authenticated with the locally
/// stored credential. Same prompts as the embedded model; no vision.
pub struct RemoteBackend {
    chat: ChatClient,
    credential: RemoteCredential,
    selector: ModelSelector,
}

impl RemoteBackend {
    pub fn new(credential: &RemoteCredential, config: &NarrationConfig) -> Result<Self, NarrationError> {
        let chat = ChatClient::new(
            BackendKind::Remote,
            &credential.api_base(),
            Some(credential.api_key.clone()),
            config,
        )?;
        Ok(Self {
            chat,
            credential: credential.clone(),
            selector: ModelSelector::new(None),
        })
    }

    /// The caller's hint wins over the configured model; unknown names fall back to the
    /// provider default.
    fn select_model(&self, model_hint: Option<&str>) -> Result<ModelSelection, NarrationError> {
        let requested = model_hint
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or(self.credential.model.as_deref());
        let provider = self.credential.provider.name();
        let selection = self
            .selector
            .select(requested, provider, TEXT)
            .map_err(NarrationError::InvalidInput)?;
        if selection.requested.is_some() {
            if let Some(reason) = selection.fallback_reason.as_deref() {
                warn!(provider, model = %selection.model.name, reason, "remote model fallback");
            }
        }
        Ok(selection)
    }
}

impl AnalysisBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn analyze(
        &self,
        _frames: &[ExtractedFrame],
        lab: &Lab,
        model_hint: Option<&str>,
    ) -> Result<String, NarrationError> {
        let selection = self.select_model(model_hint)?;
        let raw = self.chat.complete(
            &selection.model.name,
            vec![
                system_message(prompts::METADATA_NARRATOR_SYSTEM),
                user_text_message(&prompts::metadata_narrator_user(lab)),
            ],
        )?;
        Ok(tag_unmarked_lines(&raw, ConfidenceLevel::High))
    }

    fn suggest(&self, field: &str, partial: &str, context: &str) -> Result<String, NarrationError> {
        let selection = self.select_model(None)?;
        self.chat.complete(
            &selection.model.name,
            vec![
                system_message(prompts::SUGGESTION_SYSTEM),
                user_text_message(&prompts::suggestion_user(field, partial, context)),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use labnarrate_contracts::labs::Lab;
    use serde_json::json;

    use super::RemoteBackend;
    use crate::backends::AnalysisBackend;
    use crate::config::{NarrationConfig, RemoteCredential, RemoteProvider};
    use crate::test_http::CannedServer;

    fn credential(api_base: &str, model: Option<&str>) -> RemoteCredential {
        RemoteCredential {
            provider: RemoteProvider::OpenAi,
            api_key: "sk-local".to_string(),
            model: model.map(str::to_string),
            api_base: Some(api_base.to_string()),
        }
    }

    #[test]
    fn hint_selects_registered_model_and_output_is_tagged() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![(
            200,
            json!({"choices": [{"message": {"content": "Configured the DRS rules"}}]}).to_string(),
        )])?;
        let backend = RemoteBackend::new(
            &credential(&format!("{}/v1", server.base_url), Some("gpt-4.1-nano")),
            &NarrationConfig::default(),
        )?;
        let raw = backend.analyze(&[], &Lab::default(), Some("gpt-4.1-mini"))?;
        let requests = server.finish();

        assert_eq!(raw, "[HIGH] Configured the DRS rules");
        assert_eq!(requests[0].json()?["model"], "gpt-4.1-mini");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer sk-local"));
        Ok(())
    }

    #[test]
    fn unknown_models_fall_back_to_provider_default() -> anyhow::Result<()> {
        let backend = RemoteBackend::new(
            &credential("https://api.openai.com/v1", Some("gpt-4.1-nano")),
            &NarrationConfig::default(),
        )?;
        assert_eq!(backend.select_model(None)?.model.name, "gpt-4.1-nano");
        let fallback = backend.select_model(Some("llama-3.3-70b-versatile"))?;
        assert_eq!(fallback.model.name, "gpt-4o-mini");
        assert!(fallback.fallback_reason.is_some());
        Ok(())
    }
}
