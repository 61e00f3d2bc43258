use indexmap::IndexMap;

pub const TEXT: &str = "text";
pub const VISION: &str = "vision";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known narration models, in preference order per provider.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_provider(&self, provider: &str, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider && model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, provider: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.provider == provider && model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, provider: &str, capabilities: &[&str], context_window: Option<u64>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    capabilities: capabilities
                        .iter()
                        .map(|item| (*item).to_string())
                        .collect(),
                    context_window,
                },
            );
        };

    insert("gpt-4o-mini", "openai", &[TEXT, VISION], Some(128000));
    insert("gpt-4.1-mini", "openai", &[TEXT, VISION], Some(1000000));
    insert("gpt-4.1-nano", "openai", &[TEXT], Some(1000000));
    insert("llama-3.3-70b-versatile", "groq", &[TEXT], Some(131072));
    insert("llama-3.1-8b-instant", "groq", &[TEXT], Some(131072));
    insert(
        "meta-llama/llama-4-scout-17b-16e-instruct",
        "groq",
        &[TEXT, VISION],
        Some(131072),
    );
    insert("google/gemini-2.5-flash", "gateway", &[TEXT, VISION], Some(1000000));
    insert("phi-4-mini", "foundry", &[TEXT], Some(128000));
    insert("phi-3.5-vision", "foundry", &[TEXT, VISION], Some(128000));

    map
}
