use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Pick a model for `capability`, honouring `requested` when the
    /// registry knows it and it has the capability.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        tracing::debug!(model = %model.name, capability, reason = %fallback_reason, "model fallback");
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}
