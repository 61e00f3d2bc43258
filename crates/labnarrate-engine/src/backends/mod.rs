mod chat;
pub mod cloud;
pub mod embedded;
pub mod on_device;
pub mod prompts;
pub mod remote;
pub mod text_only;

use std::sync::Arc;

use indexmap::IndexMap;
use labnarrate_contracts::labs::Lab;
use labnarrate_contracts::narration::BackendKind;

use crate::config::NarrationConfig;
use crate::embedded::EmbeddedModel;
use crate::error::NarrationError;
use crate::frames::ExtractedFrame;

pub use cloud::CloudProxyBackend;
pub use embedded::EmbeddedBackend;
pub use on_device::OnDeviceBackend;
pub use remote::RemoteBackend;
pub use text_only::generate_text_only;

/// One way of turning frames plus lab context into raw narration text with inline markers.
pub trait AnalysisBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn analyze(
        &self,
        frames: &[ExtractedFrame],
        lab: &Lab,
        model_hint: Option<&str>,
    ) -> Result<String, NarrationError>;

    /// Raw completion for an editorial autocomplete prompt, one suggestion per line.
    fn suggest(&self, _field: &str, _partial: &str, _context: &str) -> Result<String, NarrationError> {
        Err(NarrationError::unavailable(
            self.kind(),
            "suggestions are not supported",
        ))
    }
}

/// Backends keyed by kind, in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: IndexMap<BackendKind, Arc<dyn AnalysisBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every backend `config` has enough information for. The on-device backend is
    /// always present; whether it is reachable is the probe's concern.
    pub fn from_config(
        config: &NarrationConfig,
        embedded: Option<Arc<dyn EmbeddedModel>>,
    ) -> Result<Self, NarrationError> {
        let mut registry = Self::new();
        if let Some(model) = embedded {
            registry.register(EmbeddedBackend::new(model));
        }
        registry.register(OnDeviceBackend::new(config)?);
        if let Some(credential) = config.remote.as_ref() {
            registry.register(RemoteBackend::new(credential, config)?);
        }
        if let Some(proxy) = config.cloud_proxy.as_ref() {
            registry.register(CloudProxyBackend::new(proxy, config)?);
        }
        Ok(registry)
    }

    pub fn register<B: AnalysisBackend + 'static>(&mut self, backend: B) {
        self.register_arc(Arc::new(backend));
    }

    pub fn register_arc(&mut self, backend: Arc<dyn AnalysisBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn AnalysisBackend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }
}
