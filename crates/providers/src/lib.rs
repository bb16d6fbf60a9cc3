//! Provider abstractions for the external classification and content-extraction services.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod noop;
pub mod openai;
pub mod prompt;

/// Sentinel destination for files that are relevant but fit no configured destination.
pub const UNSORTED: &str = "unsorted";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unexpected response: {0}")]
    BadResponse(String),
    #[error("file too large ({actual_mb:.1} MB, max {max_mb} MB)")]
    TooLarge { actual_mb: f64, max_mb: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Structured judgement returned by a classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub is_relevant: bool,
    /// A configured destination, [`UNSORTED`], or empty when irrelevant.
    pub destination: String,
    pub confidence: f32,
    pub rationale: String,
    #[serde(default)]
    pub suggested_rename: Option<String>,
}

/// What the classifier knows about a file when it asks a service.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub path: &'a Path,
    pub filename: &'a str,
    pub destinations: &'a [String],
    pub corrections: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Insufficient,
}

#[async_trait::async_trait]
pub trait ClassificationService: Send + Sync {
    /// Name-only pass.
    async fn classify(&self, req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError>;

    /// Resubmission with extracted text content.
    async fn classify_with_content(
        &self,
        req: &ClassifyRequest<'_>,
        content: &str,
    ) -> Result<Judgement, ProviderError>;

    /// Content-aware (vision) pass over an image.
    async fn classify_image(&self, req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError>;
}

#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<Extraction, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    classifiers: HashMap<String, Arc<dyn ClassificationService>>,
    extractors: HashMap<String, Arc<dyn ContentExtractor>>,
    pub preferred_classifier: Option<String>,
    pub preferred_extractor: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(
        mut self,
        name: &str,
        provider: Arc<dyn ClassificationService>,
    ) -> Self {
        self.classifiers.insert(name.to_string(), provider);
        self
    }

    pub fn with_extractor(mut self, name: &str, provider: Arc<dyn ContentExtractor>) -> Self {
        self.extractors.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_classifier(mut self, name: &str) -> Self {
        self.preferred_classifier = Some(name.to_string());
        self
    }

    pub fn set_preferred_extractor(mut self, name: &str) -> Self {
        self.preferred_extractor = Some(name.to_string());
        self
    }

    pub fn classifier(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn ClassificationService>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_classifier.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no classification service configured".into())
            })?;
        self.classifiers
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn extractor(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn ContentExtractor>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_extractor.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no content extractor configured".into()))?;
        self.extractors
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_falls_back_to_preferred() {
        let reg = ProviderRegistry::new()
            .with_classifier("noop", Arc::new(noop::NoopProvider))
            .set_preferred_classifier("noop");
        assert!(reg.classifier(None).is_ok());
        assert!(matches!(
            reg.classifier(Some("missing")),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn registry_without_preference_errors() {
        let reg = ProviderRegistry::new().with_extractor("noop", Arc::new(noop::NoopProvider));
        assert!(reg.extractor(None).is_err());
        assert!(reg.extractor(Some("noop")).is_ok());
    }
}
