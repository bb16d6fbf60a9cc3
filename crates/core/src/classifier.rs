//! Escalating classification: rule → cache → name pass → content or vision pass.
//!
//! Each file walks a small state machine ([`Route`]) with one terminal per branch.
//! Service failures never surface; the walk degrades to the cheapest signal it
//! already holds.

use crate::cache;
use crate::config::ClassificationConfig;
use crate::extractor::FileKind;
use crate::models::{
    trailing_segment, ClassificationResult, ClassificationRule, CorrectionRecord, FileEvent,
    Source, UNSORTED,
};
use crate::rules;
use providers::{ClassificationService, ClassifyRequest, ContentExtractor, Extraction};
use std::sync::Arc;
use tracing::{debug, info};

/// Thresholds and switches for escalation. Treated as policy, not structure.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub threshold: f32,
    pub escalate_images: bool,
    pub escalate_documents: bool,
}

impl From<&ClassificationConfig> for EscalationPolicy {
    fn from(cfg: &ClassificationConfig) -> Self {
        Self {
            threshold: cfg.escalation_threshold,
            escalate_images: cfg.escalate_images,
            escalate_documents: cfg.escalate_documents,
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

/// Everything the stages read besides the file itself.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub rules: &'a [ClassificationRule],
    pub history: &'a [CorrectionRecord],
    pub destinations: &'a [String],
    pub digest: &'a [String],
}

/// Where a file's classification is headed. Escalation variants carry the
/// name-pass result they fall back to.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    RuleHit(ClassificationResult),
    CacheHit(ClassificationResult),
    NameOnly(ClassificationResult),
    ImageEscalate(ClassificationResult),
    TextEscalate(ClassificationResult),
}

/// Decide what follows a name pass.
pub fn escalation(kind: FileKind, name_pass: ClassificationResult, policy: &EscalationPolicy) -> Route {
    match kind {
        FileKind::Image if policy.escalate_images && name_pass.confidence < policy.threshold => {
            Route::ImageEscalate(name_pass)
        }
        // Content outranks the filename for these, whatever the name pass said.
        FileKind::Document if policy.escalate_documents => Route::TextEscalate(name_pass),
        _ => Route::NameOnly(name_pass),
    }
}

/// Map a returned destination onto the configured set. Exact matches pass; otherwise
/// the trailing path segment is compared; anything else becomes [`UNSORTED`].
pub fn normalize_destination(raw: &str, destinations: &[String]) -> String {
    if raw == UNSORTED || destinations.iter().any(|d| d == raw) {
        return raw.to_string();
    }
    let wanted = trailing_segment(raw);
    destinations
        .iter()
        .find(|d| trailing_segment(d).eq_ignore_ascii_case(wanted))
        .cloned()
        .unwrap_or_else(|| UNSORTED.to_string())
}

fn normalize(mut result: ClassificationResult, destinations: &[String]) -> ClassificationResult {
    if result.is_relevant {
        result.destination = normalize_destination(&result.destination, destinations);
    }
    result
}

#[derive(Clone)]
pub struct Classifier {
    service: Arc<dyn ClassificationService>,
    extractor: Arc<dyn ContentExtractor>,
    policy: EscalationPolicy,
}

impl Classifier {
    pub fn new(
        service: Arc<dyn ClassificationService>,
        extractor: Arc<dyn ContentExtractor>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            service,
            extractor,
            policy,
        }
    }

    /// Run the cheap stages and the name pass, and pick the branch to finish on.
    pub async fn route(&self, file: &FileEvent, ctx: &ClassifyContext<'_>) -> Route {
        if let Some(hit) = rules::match_rule(&file.name, ctx.rules) {
            return Route::RuleHit(hit);
        }
        if let Some(hit) = cache::lookup(&file.name, ctx.history, ctx.destinations) {
            return Route::CacheHit(hit);
        }

        let req = request(file, ctx);
        let name_pass = match self.service.classify(&req).await {
            Ok(j) => normalize(
                ClassificationResult::from_judgement(j, Source::Name),
                ctx.destinations,
            ),
            Err(e) => {
                debug!(file = %file.name, error = %e, "name pass unavailable");
                return Route::NameOnly(ClassificationResult::unavailable());
            }
        };
        escalation(FileKind::of(&file.path), name_pass, &self.policy)
    }

    /// Finish a route. Always yields a result.
    pub async fn resolve(
        &self,
        route: Route,
        file: &FileEvent,
        ctx: &ClassifyContext<'_>,
    ) -> ClassificationResult {
        match route {
            Route::RuleHit(r) | Route::CacheHit(r) | Route::NameOnly(r) => r,
            Route::ImageEscalate(name_pass) => self.image_pass(file, ctx, name_pass).await,
            Route::TextEscalate(name_pass) => self.text_pass(file, ctx, name_pass).await,
        }
    }

    pub async fn classify(
        &self,
        file: &FileEvent,
        ctx: &ClassifyContext<'_>,
        force_relevant: bool,
    ) -> ClassificationResult {
        let route = self.route(file, ctx).await;
        let mut result = self.resolve(route, file, ctx).await;
        if force_relevant && !result.is_relevant {
            result.is_relevant = true;
            result.destination = normalize_destination(&result.destination, ctx.destinations);
        }
        info!(
            file = %file.name,
            source = ?result.source,
            destination = %result.destination,
            confidence = result.confidence,
            relevant = result.is_relevant,
            "classified"
        );
        result
    }

    async fn content_pass(
        &self,
        file: &FileEvent,
        ctx: &ClassifyContext<'_>,
    ) -> Option<ClassificationResult> {
        let text = match self.extractor.extract_text(&file.path).await {
            Ok(Extraction::Text(t)) => t,
            Ok(Extraction::Insufficient) => {
                debug!(file = %file.name, "extracted text insufficient");
                return None;
            }
            Err(e) => {
                debug!(file = %file.name, error = %e, "extraction failed");
                return None;
            }
        };
        match self
            .service
            .classify_with_content(&request(file, ctx), &text)
            .await
        {
            Ok(j) => Some(normalize(
                ClassificationResult::from_judgement(j, Source::Content),
                ctx.destinations,
            )),
            Err(e) => {
                debug!(file = %file.name, error = %e, "content pass failed");
                None
            }
        }
    }

    async fn image_pass(
        &self,
        file: &FileEvent,
        ctx: &ClassifyContext<'_>,
        name_pass: ClassificationResult,
    ) -> ClassificationResult {
        if let Some(r) = self.content_pass(file, ctx).await {
            return r;
        }
        match self.service.classify_image(&request(file, ctx)).await {
            Ok(j) => normalize(
                ClassificationResult::from_judgement(j, Source::Vision),
                ctx.destinations,
            ),
            Err(e) => {
                debug!(file = %file.name, error = %e, "vision pass failed, keeping name pass");
                name_pass
            }
        }
    }

    async fn text_pass(
        &self,
        file: &FileEvent,
        ctx: &ClassifyContext<'_>,
        name_pass: ClassificationResult,
    ) -> ClassificationResult {
        self.content_pass(file, ctx).await.unwrap_or(name_pass)
    }
}

fn request<'a>(file: &'a FileEvent, ctx: &ClassifyContext<'a>) -> ClassifyRequest<'a> {
    ClassifyRequest {
        path: &file.path,
        filename: &file.name,
        destinations: ctx.destinations,
        corrections: ctx.digest,
    }
}
