use std::time::Duration;

use labnarrate_contracts::narration::BackendKind;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::NarrationConfig;
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
pub(crate) struct ChatClient {
    http: HttpClient,
    backend: BackendKind,
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl ChatClient {
    /// `api_base` is the versioned root, e.g. `http://localhost:5273/v1`.
    pub fn new(
        backend: BackendKind,
        api_base: &str,
        api_key: Option<String>,
        config: &NarrationConfig,
    ) -> Result<Self, NarrationError> {
        let timeout = config.analysis_timeout();
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NarrationError::InvalidInput(format!("http client: {err}")))?;
        Ok(Self {
            http,
            backend,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn complete(&self, model: &str, messages: Vec<Value>) -> Result<String, NarrationError> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        debug!(backend = %self.backend, endpoint = %endpoint, model, "chat completion request");

        let mut request = self.http.post(&endpoint).json(&payload);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().map_err(|err| {
            NarrationError::from_transport(self.backend, self.timeout.as_secs_f64(), &err)
        })?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            NarrationError::from_transport(self.backend, self.timeout.as_secs_f64(), &err)
        })?;
        if !status.is_success() {
            return Err(NarrationError::response(
                self.backend,
                format!(
                    "request failed ({}): {}",
                    status.as_u16(),
                    truncate_text(&body, ERROR_BODY_MAX_CHARS)
                ),
            ));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            NarrationError::response(self.backend, format!("invalid JSON payload: {err}"))
        })?;
        completion_text(&parsed)
            .ok_or_else(|| NarrationError::response(self.backend, "empty completion"))
    }
}

pub(crate) fn system_message(content: &str) -> Value {
    json!({"role": "system", "content": content})
}

pub(crate) fn user_text_message(content: &str) -> Value {
    json!({"role": "user", "content": content})
}

/// A user turn carrying `text` followed by one `image_url` part per capture.
pub(crate) fn user_image_message(text: &str, frames: &[ExtractedFrame], include_tiles: bool) -> Value {
    let mut content = vec![json!({"type": "text", "text": text})];
    for frame in frames {
        content.push(image_part(&frame.full.data_url()));
        if include_tiles {
            for tile in &frame.tiles {
                content.push(image_part(&tile.data_url()));
            }
        }
    }
    json!({"role": "user", "content": content})
}

fn image_part(url: &str) -> Value {
    json!({"type": "image_url", "image_url": {"url": url}})
}

/// `choices[0].message.content`, trimmed; `None` when absent or blank.
pub(crate) fn completion_text(payload: &Value) -> Option<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub(crate) fn truncate_text(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}
