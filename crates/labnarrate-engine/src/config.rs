use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NarrationError;

pub const DEFAULT_ON_DEVICE_URL: &str = "http://localhost:5273";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteProvider {
    OpenAi,
    Groq,
}

impl RemoteProvider {
    pub fn name(self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "openai",
            RemoteProvider::Groq => "groq",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            RemoteProvider::OpenAi => "https://api.openai.com/v1",
            RemoteProvider::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

impl std::str::FromStr for RemoteProvider {
    type Err = NarrationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(RemoteProvider::OpenAi),
            "groq" => Ok(RemoteProvider::Groq),
            other => Err(NarrationError::InvalidInput(format!(
                "unknown remote provider '{other}' (expected openai or groq)"
            ))),
        }
    }
}

/// Locally stored credential for the hosted completion API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCredential {
    pub provider: RemoteProvider,
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

impl RemoteCredential {
    pub fn api_base(&self) -> String {
        self.api_base
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.provider.default_api_base())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudProxyConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Everything backend selection depends on besides the probe result and requested mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub on_device_url: String,
    pub probe_timeout_ms: u64,
    pub analysis_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub remote: Option<RemoteCredential>,
    pub cloud_proxy: Option<CloudProxyConfig>,
    pub embedded_command: Option<String>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub extraction_budget_secs: Option<u64>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            on_device_url: DEFAULT_ON_DEVICE_URL.to_string(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            analysis_timeout_secs: DEFAULT_ANALYSIS_TIMEOUT_SECS,
            max_tokens: 4096,
            temperature: 0.1,
            remote: None,
            cloud_proxy: None,
            embedded_command: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            extraction_budget_secs: None,
        }
    }
}

impl NarrationConfig {
    /// Reads the `LABNARRATE_*` environment. Empty values count as unset.
    pub fn from_env() -> Result<Self, NarrationError> {
        let defaults = Self::default();

        let remote = match (
            non_empty_env("LABNARRATE_REMOTE_PROVIDER"),
            non_empty_env("LABNARRATE_REMOTE_API_KEY"),
        ) {
            (Some(provider), Some(api_key)) => Some(RemoteCredential {
                provider: provider.parse()?,
                api_key,
                model: non_empty_env("LABNARRATE_REMOTE_MODEL"),
                api_base: non_empty_env("LABNARRATE_REMOTE_API_BASE"),
            }),
            _ => None,
        };

        let cloud_proxy = non_empty_env("LABNARRATE_CLOUD_PROXY_URL").map(|url| CloudProxyConfig {
            url,
            api_key: non_empty_env("LABNARRATE_CLOUD_PROXY_KEY"),
        });

        Ok(Self {
            on_device_url: non_empty_env("LABNARRATE_ON_DEVICE_URL")
                .unwrap_or(defaults.on_device_url),
            probe_timeout_ms: parse_env("LABNARRATE_PROBE_TIMEOUT_MS")?
                .unwrap_or(defaults.probe_timeout_ms),
            analysis_timeout_secs: parse_env("LABNARRATE_ANALYSIS_TIMEOUT_SECS")?
                .unwrap_or(defaults.analysis_timeout_secs),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            remote,
            cloud_proxy,
            embedded_command: non_empty_env("LABNARRATE_EMBEDDED_COMMAND"),
            ffmpeg_path: non_empty_env("LABNARRATE_FFMPEG").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: non_empty_env("LABNARRATE_FFPROBE").unwrap_or(defaults.ffprobe_path),
            extraction_budget_secs: parse_env("LABNARRATE_EXTRACTION_BUDGET_SECS")?,
        })
    }

    /// Reads a JSON config file; omitted fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, NarrationError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            NarrationError::InvalidInput(format!("cannot read config {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            NarrationError::InvalidInput(format!("invalid config {}: {err}", path.display()))
        })
    }

    pub fn on_device_base(&self) -> String {
        self.on_device_url.trim().trim_end_matches('/').to_string()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs.max(1))
    }

    pub fn extraction_budget(&self) -> Option<Duration> {
        self.extraction_budget_secs.map(Duration::from_secs)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, NarrationError> {
    let Some(raw) = non_empty_env(key) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| NarrationError::InvalidInput(format!("{key} must be a number, got '{raw}'")))
}
