use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::narration::BackendKind;
use tracing::debug;

use super::chat::{system_message, user_image_message, user_text_message, ChatClient};
use super::{prompts, AnalysisBackend};
use crate::config::NarrationConfig;
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

/// Model name the on-device server resolves to whatever it has loaded.
pub const AUTO_MODEL: &str = "auto";

/// Two-pass vision analysis against the local inference server.
///
/// Pass one sends every frame with its quadrant tiles and asks only for an inventory of what is
/// legible. Pass two sends the full frames again with that inventory and the lab metadata, and
/// asks for a narration restricted to the inventory.
pub struct OnDeviceBackend {
    chat: ChatClient,
}

impl OnDeviceBackend {
    pub fn new(config: &NarrationConfig) -> Result<Self, NarrationError> {
        let api_base = format!("{}/v1", config.on_device_base());
        Ok(Self {
            chat: ChatClient::new(BackendKind::OnDevice, &api_base, None, config)?,
        })
    }
}

impl AnalysisBackend for OnDeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    fn analyze(
        &self,
        frames: &[ExtractedFrame],
        lab: &Lab,
        model_hint: Option<&str>,
    ) -> Result<String, NarrationError> {
        let model = model_hint.unwrap_or(AUTO_MODEL);

        let inventory = self.chat.complete(
            model,
            vec![
                system_message(prompts::INVENTORY_SYSTEM),
                user_image_message(
                    &prompts::inventory_instruction(frames.len(), &lab.title),
                    frames,
                    true,
                ),
            ],
        )?;
        debug!(model, chars = inventory.len(), "on-device inventory pass finished");

        let metadata = prompts::metadata_context(lab);
        self.chat.complete(
            model,
            vec![
                system_message(&prompts::narration_system(lab, &metadata, &inventory)),
                user_image_message(prompts::NARRATION_INSTRUCTION, frames, false),
            ],
        )
    }

    fn suggest(&self, field: &str, partial: &str, context: &str) -> Result<String, NarrationError> {
        self.chat.complete(
            AUTO_MODEL,
            vec![
                system_message(prompts::SUGGESTION_SYSTEM),
                user_text_message(&prompts::suggestion_user(field, partial, context)),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use labnarrate_contracts::labs::Lab;
    use serde_json::{json, Value};

    use super::OnDeviceBackend;
    use crate::backends::AnalysisBackend;
    use crate::config::NarrationConfig;
    use crate::frames::ExtractedFrame;
    use crate::test_http::CannedServer;

    fn completion(content: &str) -> String {
        json!({"choices": [{"message": {"content": content}}]}).to_string()
    }

    fn image_parts(body: &Value) -> usize {
        body.pointer("/messages/1/content")
            .and_then(Value::as_array)
            .map(|parts| parts.iter().filter(|part| part["type"] == "image_url").count())
            .unwrap_or_default()
    }

    #[test]
    fn second_pass_sees_inventory_without_tiles() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![
            (200, completion("top-left: vSphere Client 8.0.2")),
            (200, completion("1. [HIGH] Opened the vSphere Client")),
        ])?;
        let config = NarrationConfig {
            on_device_url: server.base_url.clone(),
            ..NarrationConfig::default()
        };
        let frame = ExtractedFrame::capture(&RgbaImage::from_pixel(16, 16, Rgba([9, 9, 9, 255])), 0.0)
            .map_err(anyhow::Error::msg)?;
        let lab = Lab {
            title: "vCenter Deploy".to_string(),
            objective: "Deploy vCenter".to_string(),
            ..Lab::default()
        };

        let backend = OnDeviceBackend::new(&config)?;
        let raw = backend.analyze(&[frame.clone(), frame], &lab, None)?;
        let requests = server.finish();

        assert_eq!(raw, "1. [HIGH] Opened the vSphere Client");
        let inventory = requests[0].json()?;
        let narration = requests[1].json()?;
        assert_eq!(inventory["model"], "auto");
        assert_eq!(image_parts(&inventory), 10);
        assert_eq!(image_parts(&narration), 2);
        let system = narration
            .pointer("/messages/0/content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        assert!(system.contains("top-left: vSphere Client 8.0.2"));
        assert!(system.contains("lab titled \"vCenter Deploy\""));
        Ok(())
    }
}
