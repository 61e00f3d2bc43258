use std::sync::Arc;

use labnarrate_contracts::models::{ModelSelector, TEXT};
use labnarrate_contracts::narration::BackendKind;
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::NarrationConfig;
use crate::embedded::{EmbeddedAvailability, EmbeddedModel};
use crate::error::NarrationError;

/// Which primary backend can take work right now.
///
/// The cloud proxy is never reported here; it is the orchestrator's last resort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub available: bool,
    pub backend: Option<BackendKind>,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeReport {
    pub fn found(backend: BackendKind, models: Vec<String>, message: Option<String>) -> Self {
        Self {
            available: true,
            backend: Some(backend),
            models,
            message,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            available: false,
            backend: None,
            models: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// The backend to try first, if any.
    pub fn primary(&self) -> Option<BackendKind> {
        if self.available {
            self.backend
        } else {
            None
        }
    }
}

pub trait AvailabilityProbe: Send + Sync {
    fn check_availability(&self) -> ProbeReport;
}

/// Checks the embedded model, then the on-device server, then the stored remote credential.
pub struct BackendProbe {
    config: NarrationConfig,
    embedded: Option<Arc<dyn EmbeddedModel>>,
    http: HttpClient,
}

impl BackendProbe {
    pub fn new(
        config: &NarrationConfig,
        embedded: Option<Arc<dyn EmbeddedModel>>,
    ) -> Result<Self, NarrationError> {
        let http = HttpClient::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|err| NarrationError::InvalidInput(format!("http client: {err}")))?;
        Ok(Self {
            config: config.clone(),
            embedded,
            http,
        })
    }

    fn check_embedded(&self) -> Option<ProbeReport> {
        let model = self.embedded.as_ref()?;
        let name = model.name().to_string();
        let message = match model.availability() {
            EmbeddedAvailability::Readily => format!("{name} ready"),
            EmbeddedAvailability::AfterDownload => format!("{name} (downloading)"),
            EmbeddedAvailability::No => {
                debug!(model = %name, "embedded model not available");
                return None;
            }
        };
        Some(ProbeReport::found(
            BackendKind::BrowserEmbedded,
            vec![name],
            Some(message),
        ))
    }

    fn check_on_device(&self) -> Option<ProbeReport> {
        let url = format!("{}/v1/models", self.config.on_device_base());
        let response = match self.http.get(&url).send() {
            Ok(response) => response,
            Err(err) => {
                debug!(url = %url, error = %err, "on-device server not reachable");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url = %url, status = response.status().as_u16(), "on-device server rejected probe");
            return None;
        }
        let payload: Value = response.json().unwrap_or(Value::Null);
        let models = payload
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();
        Some(ProbeReport::found(BackendKind::OnDevice, models, None))
    }

    fn check_remote(&self) -> Option<ProbeReport> {
        let credential = self.config.remote.as_ref()?;
        if credential.api_key.trim().is_empty() {
            return None;
        }
        let provider = credential.provider.name();
        let models = ModelSelector::new(None)
            .select(credential.model.as_deref(), provider, TEXT)
            .map(|selection| vec![selection.model.name])
            .unwrap_or_default();
        Some(ProbeReport::found(
            BackendKind::Remote,
            models,
            Some(format!("{provider} credential configured")),
        ))
    }
}

impl AvailabilityProbe for BackendProbe {
    fn check_availability(&self) -> ProbeReport {
        self.check_embedded()
            .or_else(|| self.check_on_device())
            .or_else(|| self.check_remote())
            .unwrap_or_else(|| {
                ProbeReport::unavailable("no embedded, on-device or remote backend is configured")
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use labnarrate_contracts::narration::BackendKind;
    use serde_json::json;

    use super::{AvailabilityProbe, BackendProbe, ProbeReport};
    use crate::config::{NarrationConfig, RemoteCredential, RemoteProvider};
    use crate::embedded::{EmbeddedAvailability, EmbeddedModel};
    use crate::error::NarrationError;
    use crate::test_http::{unreachable_base_url, CannedServer};

    struct StubModel(EmbeddedAvailability);

    impl EmbeddedModel for StubModel {
        fn name(&self) -> &str {
            "gemini-nano"
        }

        fn availability(&self) -> EmbeddedAvailability {
            self.0
        }

        fn prompt(&self, _system: &str, _user: &str) -> Result<String, NarrationError> {
            Ok(String::new())
        }
    }

    fn offline_config() -> anyhow::Result<NarrationConfig> {
        Ok(NarrationConfig {
            on_device_url: unreachable_base_url()?,
            probe_timeout_ms: 500,
            ..NarrationConfig::default()
        })
    }

    fn groq() -> RemoteCredential {
        RemoteCredential {
            provider: RemoteProvider::Groq,
            api_key: "gsk-test".to_string(),
            model: None,
            api_base: None,
        }
    }

    #[test]
    fn nothing_configured_is_unavailable() -> anyhow::Result<()> {
        let report = BackendProbe::new(&offline_config()?, None)?.check_availability();
        assert!(!report.available);
        assert_eq!(report.primary(), None);
        assert!(report.models.is_empty());
        assert!(report.message.is_some());
        Ok(())
    }

    #[test]
    fn embedded_model_wins_over_remote_credential() -> anyhow::Result<()> {
        let config = NarrationConfig {
            remote: Some(groq()),
            ..offline_config()?
        };
        let model: Arc<dyn EmbeddedModel> = Arc::new(StubModel(EmbeddedAvailability::AfterDownload));
        let report = BackendProbe::new(&config, Some(model))?.check_availability();
        assert_eq!(report.primary(), Some(BackendKind::BrowserEmbedded));
        assert_eq!(report.models, vec!["gemini-nano".to_string()]);
        assert_eq!(report.message.as_deref(), Some("gemini-nano (downloading)"));
        Ok(())
    }

    #[test]
    fn unusable_embedded_model_falls_through_to_remote() -> anyhow::Result<()> {
        let config = NarrationConfig {
            remote: Some(groq()),
            ..offline_config()?
        };
        let model: Arc<dyn EmbeddedModel> = Arc::new(StubModel(EmbeddedAvailability::No));
        let report = BackendProbe::new(&config, Some(model))?.check_availability();
        assert_eq!(report.primary(), Some(BackendKind::Remote));
        assert_eq!(report.models, vec!["llama-3.3-70b-versatile".to_string()]);
        Ok(())
    }

    #[test]
    fn on_device_server_lists_its_models() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![(
            200,
            json!({"data": [{"id": "phi-4-mini"}, {"id": "phi-3.5-vision"}]}).to_string(),
        )])?;
        let config = NarrationConfig {
            on_device_url: format!("{}/", server.base_url),
            remote: Some(groq()),
            ..NarrationConfig::default()
        };
        let report = BackendProbe::new(&config, None)?.check_availability();
        let requests = server.finish();

        assert_eq!(
            report,
            ProbeReport::found(
                BackendKind::OnDevice,
                vec!["phi-4-mini".to_string(), "phi-3.5-vision".to_string()],
                None,
            )
        );
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/v1/models");
        Ok(())
    }

    #[test]
    fn on_device_error_status_is_not_available() -> anyhow::Result<()> {
        let server = CannedServer::start(vec![(503, "{}".to_string())])?;
        let config = NarrationConfig {
            on_device_url: server.base_url.clone(),
            ..NarrationConfig::default()
        };
        let report = BackendProbe::new(&config, None)?.check_availability();
        server.finish();
        assert!(!report.available);
        Ok(())
    }
}
