mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAP_EDIT, CAP_IMAGE, CAP_TEXT, CAP_VIDEO};
pub use selectors::{ModelSelection, ModelSelector};

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{ModelRegistry, ModelSelector, ModelSpec, CAP_IMAGE, CAP_VIDEO};

    fn model(name: &str, capabilities: &[&str]) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: capabilities.iter().map(|cap| cap.to_string()).collect(),
            credit_key: None,
        }
    }

    fn registry(models: Vec<ModelSpec>) -> ModelRegistry {
        let mut map = IndexMap::new();
        for spec in models {
            map.insert(spec.name.clone(), spec);
        }
        ModelRegistry::new(Some(map))
    }

    #[test]
    fn requested_model_is_used_when_capable() -> Result<(), String> {
        let selector = ModelSelector::new(Some(registry(vec![
            model("clip-a", &[CAP_VIDEO]),
            model("clip-b", &[CAP_VIDEO]),
        ])));
        let selection = selector.select(Some("clip-b"), CAP_VIDEO)?;
        assert_eq!(selection.model.name, "clip-b");
        assert_eq!(selection.fallback_reason, None);
        Ok(())
    }

    #[test]
    fn incapable_request_falls_back_with_reason() -> Result<(), String> {
        let selector = ModelSelector::new(Some(registry(vec![
            model("still", &[CAP_IMAGE]),
            model("motion", &[CAP_VIDEO]),
        ])));
        let selection = selector.select(Some("still"), CAP_VIDEO)?;
        assert_eq!(selection.model.name, "motion");
        assert_eq!(selection.requested.as_deref(), Some("still"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'still' unavailable for capability 'video'.")
        );
        Ok(())
    }

    #[test]
    fn blank_request_uses_default() -> Result<(), String> {
        let selector = ModelSelector::new(Some(registry(vec![model("still", &[CAP_IMAGE])])));
        let selection = selector.select(Some("  "), CAP_IMAGE)?;
        assert_eq!(selection.model.name, "still");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
        Ok(())
    }

    #[test]
    fn no_capable_model_is_an_error() {
        let selector = ModelSelector::new(Some(registry(vec![model("still", &[CAP_IMAGE])])));
        let err = selector.select(None, CAP_VIDEO).err().unwrap_or_default();
        assert_eq!(err, "No models available for capability 'video'.");
    }

    #[test]
    fn default_registry_covers_every_pipeline_capability() {
        let registry = ModelRegistry::new(None);
        for capability in [super::CAP_TEXT, CAP_IMAGE, CAP_VIDEO] {
            assert!(!registry.by_capability(capability).is_empty());
        }
        let dryrun = registry.get("dryrun-image-1").map(|spec| spec.credit_key().to_string());
        assert_eq!(dryrun.as_deref(), Some("dryrun-image"));
    }
}
