use crate::{
    ClassificationService, ClassifyRequest, ContentExtractor, Extraction, Judgement,
    ProviderError,
};
use std::path::Path;

/// Stands in when no service is configured. Every call reports unavailability.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl ClassificationService for NoopProvider {
    async fn classify(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        Err(ProviderError::Unavailable("no classification service".into()))
    }

    async fn classify_with_content(
        &self,
        _req: &ClassifyRequest<'_>,
        _content: &str,
    ) -> Result<Judgement, ProviderError> {
        Err(ProviderError::Unavailable("no classification service".into()))
    }

    async fn classify_image(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        Err(ProviderError::Unavailable("no classification service".into()))
    }
}

#[async_trait::async_trait]
impl ContentExtractor for NoopProvider {
    async fn extract_text(&self, _path: &Path) -> Result<Extraction, ProviderError> {
        Ok(Extraction::Insufficient)
    }
}
