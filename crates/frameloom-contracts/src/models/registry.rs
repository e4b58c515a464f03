use indexmap::IndexMap;

pub const CAP_TEXT: &str = "text";
pub const CAP_IMAGE: &str = "image";
pub const CAP_VIDEO: &str = "video";
pub const CAP_EDIT: &str = "edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    /// Row in the credit table; the model name when absent.
    pub credit_key: Option<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn credit_key(&self) -> &str {
        self.credit_key.as_deref().unwrap_or(&self.name)
    }
}

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

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], credit_key: Option<&str>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                credit_key: credit_key.map(str::to_string),
            },
        );
    };

    // Order matters: the first capable model is the fallback default.
    insert("gpt-4o-mini", "openai", &[CAP_TEXT], None);
    insert("gpt-4o", "openai", &[CAP_TEXT], None);
    insert("gemini-2.5-flash", "gemini", &[CAP_TEXT], None);
    insert("flux-schnell", "flux", &[CAP_IMAGE, CAP_EDIT], None);
    insert("flux-pro", "flux", &[CAP_IMAGE, CAP_EDIT], None);
    insert("gpt-image-1", "openai", &[CAP_IMAGE, CAP_EDIT], None);
    insert("imagen-4", "imagen", &[CAP_IMAGE], None);
    insert("kling-v2", "kling", &[CAP_VIDEO], None);
    insert("veo-3", "gemini", &[CAP_VIDEO], None);
    insert("runway-gen4-turbo", "runway", &[CAP_VIDEO], None);
    insert("dryrun-text-1", "dryrun", &[CAP_TEXT], Some("dryrun-text"));
    insert("dryrun-image-1", "dryrun", &[CAP_IMAGE, CAP_EDIT], Some("dryrun-image"));
    insert("dryrun-video-1", "dryrun", &[CAP_VIDEO], Some("dryrun-video"));

    map
}
