use std::time::Duration;

use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::narration::BackendKind;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::chat::truncate_text;
use super::{prompts, AnalysisBackend};
use crate::config::{CloudProxyConfig, NarrationConfig};
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

// Payload caps enforced by the relay per pass.
pub const INVENTORY_FRAME_LIMIT: usize = 4;
pub const INVENTORY_TILE_LIMIT: usize = 2;
pub const NARRATION_FRAME_LIMIT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPass {
    Inventory,
    Narration,
}

impl RelayPass {
    fn as_str(self) -> &'static str {
        match self {
            RelayPass::Inventory => "inventory",
            RelayPass::Narration => "narration",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    inventory: Option<String>,
    #[serde(default)]
    narration: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The on-device two-pass protocol executed through a server-side relay that holds the
/// credential for a hosted vision model.
pub struct CloudProxyBackend {
    http: HttpClient,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl CloudProxyBackend {
    pub fn new(proxy: &CloudProxyConfig, config: &NarrationConfig) -> Result<Self, NarrationError> {
        let timeout = config.analysis_timeout();
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NarrationError::InvalidInput(format!("http client: {err}")))?;
        Ok(Self {
            http,
            url: proxy.url.trim().to_string(),
            api_key: proxy.api_key.clone(),
            timeout,
        })
    }

    fn call(&self, body: &Value) -> Result<RelayResponse, NarrationError> {
        let backend = BackendKind::CloudProxy;
        let mut request = self.http.post(&self.url).json(body);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .map_err(|err| NarrationError::from_transport(backend, self.timeout.as_secs_f64(), &err))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| NarrationError::from_transport(backend, self.timeout.as_secs_f64(), &err))?;
        if !status.is_success() {
            return Err(NarrationError::response(
                backend,
                format!("relay failed ({}): {}", status.as_u16(), truncate_text(&text, 512)),
            ));
        }
        let parsed: RelayResponse = serde_json::from_str(&text).map_err(|err| {
            NarrationError::response(backend, format!("invalid relay payload: {err}"))
        })?;
        if let Some(error) = parsed.error.as_deref().filter(|error| !error.trim().is_empty()) {
            return Err(NarrationError::response(backend, error.to_string()));
        }
        Ok(parsed)
    }
}

impl AnalysisBackend for CloudProxyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudProxy
    }

    fn analyze(
        &self,
        frames: &[ExtractedFrame],
        lab: &Lab,
        _model_hint: Option<&str>,
    ) -> Result<String, NarrationError> {
        let metadata = prompts::metadata_context(lab);

        let inventory = self
            .call(&relay_body(RelayPass::Inventory, frames, lab, &metadata, None))?
            .inventory
            .unwrap_or_default();
        debug!(chars = inventory.len(), "cloud inventory pass finished");

        let narration = self
            .call(&relay_body(
                RelayPass::Narration,
                frames,
                lab,
                &metadata,
                Some(&inventory),
            ))?
            .narration
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        if narration.is_empty() {
            return Err(NarrationError::response(
                BackendKind::CloudProxy,
                "empty narration",
            ));
        }
        Ok(narration)
    }
}

/// Frames are trimmed client-side to what the relay would keep anyway.
fn relay_body(
    pass: RelayPass,
    frames: &[ExtractedFrame],
    lab: &Lab,
    metadata: &str,
    inventory: Option<&str>,
) -> Value {
    let (frame_limit, tile_limit) = match pass {
        RelayPass::Inventory => (INVENTORY_FRAME_LIMIT, INVENTORY_TILE_LIMIT),
        RelayPass::Narration => (NARRATION_FRAME_LIMIT, 0),
    };
    let frames = frames
        .iter()
        .take(frame_limit)
        .map(|frame| {
            json!({
                "full": frame.full.data_url(),
                "tiles": frame
                    .tiles
                    .iter()
                    .take(tile_limit)
                    .map(|tile| tile.data_url())
                    .collect::<Vec<String>>(),
                "timestamp": frame.timestamp_secs,
            })
        })
        .collect::<Vec<Value>>();
    let mut body = json!({
        "pass": pass.as_str(),
        "frames": frames,
        "metadata": metadata,
        "labTitle": lab.title,
        "labObjective": lab.objective,
    });
    if let (Some(inventory), Some(map)) = (inventory, body.as_object_mut()) {
        map.insert("inventory".to_string(), Value::String(inventory.to_string()));
    }
    body
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use labnarrate_contracts::labs::Lab;
    use serde_json::{json, Value};

    use super::{relay_body, CloudProxyBackend, RelayPass};
    use crate::backends::AnalysisBackend;
    use crate::config::{CloudProxyConfig, NarrationConfig};
    use crate::error::NarrationError;
    use crate::frames::ExtractedFrame;
    use crate::test_http::CannedServer;

    fn frames(count: usize) -> anyhow::Result<Vec<ExtractedFrame>> {
        (0..count)
            .map(|idx| {
                let level = (idx * 30) as u8;
                ExtractedFrame::capture(&RgbaImage::from_pixel(8, 8, Rgba([level, 0, 0, 255])), idx as f64)
                    .map_err(anyhow::Error::msg)
            })
            .collect()
    }

    fn lab() -> Lab {
        Lab {
            title: "Horizon Pool".to_string(),
            objective: "Publish a desktop pool".to_string(),
            ..Lab::default()
        }
    }

    #[test]
    fn relay_bodies_respect_pass_limits() -> anyhow::Result<()> {
        let frames = frames(7)?;
        let inventory = relay_body(RelayPass::Inventory, &frames, &lab(), "META", None);
        assert_eq!(inventory["pass"], "inventory");
        assert_eq!(inventory["frames"].as_array().map(Vec::len), Some(4));
        assert_eq!(inventory["frames"][0]["tiles"].as_array().map(Vec::len), Some(2));
        assert_eq!(inventory["labTitle"], "Horizon Pool");
        assert!(inventory.get("inventory").is_none());

        let narration = relay_body(RelayPass::Narration, &frames, &lab(), "META", Some("inv"));
        assert_eq!(narration["frames"].as_array().map(Vec::len), Some(6));
        assert_eq!(narration["frames"][5]["timestamp"], 5.0);
        assert_eq!(narration["frames"][0]["tiles"], json!([]));
        assert_eq!(narration["inventory"], "inv");
        Ok(())
    }

    #[test]
    fn two_calls_thread_the_inventory_through() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![
            (200, json!({"inventory": "center: Horizon Console"}).to_string()),
            (
                200,
                json!({"narration": "[HIGH] Created pool", "segments": [], "overallConfidence": "high"})
                    .to_string(),
            ),
        ])?;
        let proxy = CloudProxyConfig {
            url: format!("{}/functions/v1/narrate-lab", server.base_url),
            api_key: Some("anon-key".to_string()),
        };
        let backend = CloudProxyBackend::new(&proxy, &NarrationConfig::default())?;
        let raw = backend.analyze(&frames(1)?, &lab(), None)?;
        let requests = server.finish();

        assert_eq!(raw, "[HIGH] Created pool");
        assert_eq!(requests[0].path, "/functions/v1/narrate-lab");
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer anon-key"));
        let second: Value = requests[1].json()?;
        assert_eq!(second["pass"], "narration");
        assert_eq!(second["inventory"], "center: Horizon Console");
        Ok(())
    }

    #[test]
    fn relay_errors_are_response_errors() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![
            (500, json!({"error": "gateway down"}).to_string()),
            (200, json!({"inventory": ""}).to_string()),
            (200, json!({"narration": "  "}).to_string()),
        ])?;
        let proxy = CloudProxyConfig {
            url: server.base_url.clone(),
            api_key: None,
        };
        let backend = CloudProxyBackend::new(&proxy, &NarrationConfig::default())?;
        let failed = backend.analyze(&frames(1)?, &lab(), None).err();
        let empty = backend.analyze(&frames(1)?, &lab(), None).err();
        server.finish();

        assert!(matches!(failed, Some(NarrationError::BackendResponse { .. })));
        assert!(matches!(empty, Some(NarrationError::BackendResponse { .. })));
        Ok(())
    }
}
