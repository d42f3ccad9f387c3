use std::sync::{Mutex, PoisonError};

use crate::config::PipelineConfig;

/// Tracks the currently selected detection model.
///
/// The selection is only a default for later requests: each run works with
/// the identifier returned by [`ModelSelector::verify_model`], so concurrent
/// runs never observe each other's model mid-flight.
#[derive(Debug)]
pub struct ModelSelector {
    default_model: String,
    known_models: Vec<String>,
    current: Mutex<String>,
}

impl ModelSelector {
    pub fn new(default_model: impl Into<String>, known_models: Vec<String>) -> Self {
        let default_model = default_model.into();
        Self {
            current: Mutex::new(default_model.clone()),
            default_model,
            known_models,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_model.clone(), config.known_models.clone())
    }

    pub fn current_model(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = model.into();
    }

    /// Resolve a requested identifier.
    ///
    /// Empty requests return the current selection untouched; anything else
    /// becomes the new selection. Identifiers are not checked against the
    /// registry here, unknown ones fail later when the detector loads.
    pub fn verify_model(&self, requested: &str) -> String {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if !requested.is_empty() {
            *current = requested.to_string();
        }
        current.clone()
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn known_models(&self) -> &[String] {
        &self.known_models
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.known_models.iter().any(|m| m == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MODEL, KNOWN_MODELS};

    fn selector() -> ModelSelector {
        ModelSelector::from_config(&PipelineConfig::default())
    }

    #[test]
    fn starts_with_default_model() {
        let s = selector();
        assert_eq!(s.current_model(), DEFAULT_MODEL);
        assert_eq!(s.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn empty_request_never_mutates() {
        let s = selector();
        s.set_model(KNOWN_MODELS[1]);
        assert_eq!(s.verify_model(""), KNOWN_MODELS[1]);
        assert_eq!(s.current_model(), KNOWN_MODELS[1]);
    }

    #[test]
    fn selection_is_idempotent() {
        let s = selector();
        assert_eq!(s.verify_model(KNOWN_MODELS[2]), KNOWN_MODELS[2]);
        assert_eq!(s.verify_model(KNOWN_MODELS[2]), KNOWN_MODELS[2]);
        assert_eq!(s.current_model(), KNOWN_MODELS[2]);
    }

    #[test]
    fn unknown_identifiers_are_accepted() {
        let s = selector();
        assert_eq!(s.verify_model("someone/not-a-model"), "someone/not-a-model");
        assert!(!s.is_known("someone/not-a-model"));
        assert!(s.is_known(DEFAULT_MODEL));
    }

    #[test]
    fn registry_comes_from_config() {
        let config = PipelineConfig {
            known_models: vec!["acme/detr-plates".to_string()],
            default_model: "acme/detr-plates".to_string(),
            ..PipelineConfig::default()
        };
        let s = ModelSelector::from_config(&config);
        assert_eq!(s.known_models(), ["acme/detr-plates".to_string()]);
        assert!(s.is_known(s.default_model()));
        assert!(!s.is_known(DEFAULT_MODEL));
    }
}
