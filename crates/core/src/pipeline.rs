//! The routing engine: classification, decision, move and feedback for each file.
//!
//! Session state (history cache, skipped set, retry queue, undo window) lives on
//! [`Engine`], which the watch session shares across file tasks.

use crate::activity::{self, UndoError, UndoWindow};
use crate::classifier::{Classifier, ClassifyContext, EscalationPolicy};
use crate::config::AppConfig;
use crate::extractor::LocalExtractor;
use crate::learning::{self, Decision};
use crate::models::{
    find_destination, now_millis, ActivityEntry, ClassificationResult, ClassificationRule,
    CorrectionRecord, FileEvent, Outcome, UNSORTED,
};
use crate::mover::{self, ConflictPolicy, MoveError, MoveOutcome, MoveRequest, Moved};
use crate::retry::{Phase, RetryPolicy, RetryQueue, RetryResult};
use crate::rules;
use anyhow::Context;
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::{ClassificationService, ContentExtractor, ProviderRegistry};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the user said about a presented classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDecision {
    Accept,
    /// One of the configured destinations.
    ChooseAlternate(String),
    /// Not something to route. Recorded.
    Dismiss,
    /// Closed without an answer. Not recorded.
    IgnoreQuietly,
}

#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    pub file: FileEvent,
    pub result: ClassificationResult,
    pub final_confidence: f32,
    pub decision: Decision,
}

/// Things worth telling the user that need no answer.
#[derive(Debug, Clone)]
pub enum Notice {
    Moved { entry_id: i64, from: PathBuf, to: PathBuf },
    Waiting { source: PathBuf, phase: Phase },
    Skipped { file: FileEvent, rationale: String },
    GaveUp { source: PathBuf, reason: String },
}

/// Where decisions come from. Implemented by the CLI prompt and by tests.
#[async_trait::async_trait]
pub trait DecisionSurface: Send + Sync {
    async fn present(&self, proposal: &Proposal) -> UserDecision;

    /// One decision per proposal, in order. Missing answers count as ignored.
    async fn present_batch(&self, proposals: &[Proposal]) -> Vec<UserDecision>;

    async fn resolve_collision(&self, file: &FileEvent, target: &Path) -> ConflictPolicy;

    fn notify(&self, _notice: &Notice) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Moved { entry_id: i64, to: PathBuf },
    /// Handed to the retry queue.
    Waiting,
    /// Irrelevant; parked in the skipped set.
    Skipped,
    Dismissed,
    Ignored,
    /// Not moved: collision skip, unsorted accept or a hard failure.
    LeftInPlace,
}

/// Feedback to record once the decision is final.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub suggested: String,
    pub outcome: Outcome,
}

/// Carried alongside a move, including through the retry queue.
#[derive(Debug, Clone)]
pub struct MoveIntent {
    pub file: FileEvent,
    pub feedback: Option<Feedback>,
    /// A user answered for this file, so feedback stands even if the move does not land.
    pub user_decided: bool,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub file: FileEvent,
    pub result: ClassificationResult,
}

/// Performs one move attempt.
pub type MoveFn = fn(&MoveRequest) -> Result<MoveOutcome, MoveError>;

pub struct Engine {
    cfg: AppConfig,
    pool: SqlitePool,
    classifier: Classifier,
    mover: MoveFn,
    rules: RwLock<Vec<ClassificationRule>>,
    history: RwLock<Vec<CorrectionRecord>>,
    skipped: Mutex<Vec<SkippedFile>>,
    retries: Mutex<RetryQueue<MoveIntent>>,
    retry_added: Notify,
    undo: Mutex<UndoWindow>,
}

impl Engine {
    /// Open the store and wire providers from `registry`.
    pub async fn open(cfg: AppConfig, registry: &ProviderRegistry) -> anyhow::Result<Self> {
        let pool = storage::open(&cfg.database.path)
            .await
            .context("open database")?;
        let service = registry.classifier(None).unwrap_or_else(|e| {
            warn!(error = %e, "falling back to no classification service");
            Arc::new(NoopProvider) as Arc<dyn ClassificationService>
        });
        let extractor = registry.extractor(None).unwrap_or_else(|_| {
            Arc::new(LocalExtractor::new(cfg.classification.min_extracted_chars))
                as Arc<dyn ContentExtractor>
        });
        let classifier = Classifier::new(
            service,
            extractor,
            EscalationPolicy::from(&cfg.classification),
        );
        Self::from_parts(cfg, pool, classifier).await
    }

    pub async fn from_parts(
        cfg: AppConfig,
        pool: SqlitePool,
        classifier: Classifier,
    ) -> anyhow::Result<Self> {
        let retry = RetryPolicy::from(&cfg.retry);
        let window = cfg.undo.window();
        let engine = Self {
            cfg,
            pool,
            classifier,
            mover: mover::move_file,
            rules: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            skipped: Mutex::new(Vec::new()),
            retries: Mutex::new(RetryQueue::new(retry)),
            retry_added: Notify::new(),
            undo: Mutex::new(UndoWindow::new(window)),
        };
        engine.reload_rules().await?;
        engine.refresh_history().await?;
        Ok(engine)
    }

    /// Swap the filesystem move, e.g. for a destination that reports busy.
    pub fn with_mover(mut self, mover: MoveFn) -> Self {
        self.mover = mover;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn destinations(&self) -> &[String] {
        &self.cfg.watch.destinations
    }

    /// Stored rules in creation order, then any rule files from the configured directory.
    pub async fn reload_rules(&self) -> anyhow::Result<()> {
        let mut loaded = storage::rules::list(&self.pool).await?;
        if let Some(dir) = &self.cfg.rules.path {
            loaded.extend(rules::load_rules_from_dir(Path::new(dir))?);
        }
        debug!(count = loaded.len(), "rules loaded");
        *self.rules.write().await = loaded;
        Ok(())
    }

    pub async fn refresh_history(&self) -> anyhow::Result<()> {
        let records = storage::corrections::list(&self.pool).await?;
        *self.history.write().await = records;
        Ok(())
    }

    pub async fn history(&self) -> Vec<CorrectionRecord> {
        self.history.read().await.clone()
    }

    /// Classify and score without acting.
    pub async fn preview(&self, file: &FileEvent, force_relevant: bool) -> Proposal {
        let rules = self.rules.read().await.clone();
        let history = self.history.read().await.clone();
        let digest = learning::correction_digest(&history, self.cfg.classification.digest_size);
        let ctx = ClassifyContext {
            rules: &rules,
            history: &history,
            destinations: self.destinations(),
            digest: &digest,
        };
        let result = self.classifier.classify(file, &ctx, force_relevant).await;
        let final_confidence = learning::final_confidence(&result, &file.name, &history);
        let decision = learning::decide(&result, final_confidence, &self.cfg.classification);
        debug!(
            file = %file.name,
            raw = result.confidence,
            adjusted = final_confidence,
            ?decision,
            "scored"
        );
        Proposal {
            file: file.clone(),
            result,
            final_confidence,
            decision,
        }
    }

    pub async fn process_file(
        &self,
        file: &FileEvent,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Resolution> {
        let proposal = self.preview(file, false).await;
        self.settle(proposal, surface).await
    }

    /// Act on a scored proposal: skip, auto-move, or ask.
    async fn settle(
        &self,
        proposal: Proposal,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Resolution> {
        match proposal.decision {
            Decision::Skip => Ok(self.park(proposal, surface).await),
            Decision::AutoMove => self.auto_move(proposal, surface).await,
            Decision::Suggest | Decision::Review => {
                let answer = surface.present(&proposal).await;
                self.apply_decision(&proposal, answer, surface, false).await
            }
        }
    }

    async fn park(&self, proposal: Proposal, surface: &dyn DecisionSurface) -> Resolution {
        info!(file = %proposal.file.name, "not relevant, skipped");
        surface.notify(&Notice::Skipped {
            file: proposal.file.clone(),
            rationale: proposal.result.rationale.clone(),
        });
        let mut skipped = self.skipped.lock().await;
        skipped.retain(|s| s.file.path != proposal.file.path);
        skipped.push(SkippedFile {
            file: proposal.file,
            result: proposal.result,
        });
        Resolution::Skipped
    }

    async fn auto_move(
        &self,
        proposal: Proposal,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Resolution> {
        let feedback = proposal.result.source.is_suggestion().then(|| Feedback {
            suggested: proposal.result.destination.clone(),
            outcome: Outcome::Accepted,
        });
        let request = self.request_for(&proposal, &proposal.result.destination);
        let intent = MoveIntent {
            file: proposal.file.clone(),
            feedback,
            user_decided: false,
        };
        self.execute(request, intent, surface).await
    }

    /// Apply one user decision. `batch` moves never prompt on collisions.
    async fn apply_decision(
        &self,
        proposal: &Proposal,
        answer: UserDecision,
        surface: &dyn DecisionSurface,
        batch: bool,
    ) -> anyhow::Result<Resolution> {
        let suggested = if proposal.result.destination.is_empty() {
            UNSORTED.to_string()
        } else {
            proposal.result.destination.clone()
        };

        let (destination, outcome) = match answer {
            UserDecision::IgnoreQuietly => {
                debug!(file = %proposal.file.name, "ignored");
                return Ok(Resolution::Ignored);
            }
            UserDecision::Dismiss => {
                self.remember(CorrectionRecord {
                    filename: proposal.file.name.clone(),
                    suggested,
                    chosen: String::new(),
                    outcome: Outcome::Dismissed,
                    created_at: now_millis(),
                })
                .await?;
                return Ok(Resolution::Dismissed);
            }
            UserDecision::Accept if proposal.result.is_unsorted() => {
                warn!(file = %proposal.file.name, "nothing to accept for an unsorted file");
                return Ok(Resolution::LeftInPlace);
            }
            UserDecision::Accept => (suggested.clone(), Outcome::Accepted),
            UserDecision::ChooseAlternate(choice) => {
                let Some(choice) = find_destination(self.destinations(), &choice).cloned() else {
                    warn!(file = %proposal.file.name, %choice, "not a configured destination, left in place");
                    return Ok(Resolution::LeftInPlace);
                };
                let outcome = if choice.eq_ignore_ascii_case(&suggested) {
                    Outcome::Accepted
                } else {
                    Outcome::Corrected
                };
                (choice, outcome)
            }
        };

        let mut request = self.request_for(proposal, &destination);
        if !batch && request.target().exists() {
            request.policy = surface.resolve_collision(&proposal.file, &request.target()).await;
        }
        let intent = MoveIntent {
            file: proposal.file.clone(),
            feedback: Some(Feedback { suggested, outcome }),
            user_decided: true,
        };
        self.execute(request, intent, surface).await
    }

    fn request_for(&self, proposal: &Proposal, destination: &str) -> MoveRequest {
        let rename = if self.cfg.classification.smart_rename {
            proposal.result.suggested_rename.clone()
        } else {
            None
        };
        MoveRequest::new(&proposal.file.path, destination).with_rename(rename)
    }

    async fn execute(
        &self,
        request: MoveRequest,
        intent: MoveIntent,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Resolution> {
        match (self.mover)(&request) {
            Ok(MoveOutcome::Moved(moved)) => self.finish(&request, intent, moved, surface).await,
            Ok(MoveOutcome::Skipped) => {
                self.settle_unmoved(&request, intent).await?;
                Ok(Resolution::LeftInPlace)
            }
            Err(e) if e.is_contention() => {
                let source = request.source.clone();
                self.retries
                    .lock()
                    .await
                    .enqueue(request, intent, Instant::now());
                self.retry_added.notify_one();
                surface.notify(&Notice::Waiting {
                    source,
                    phase: Phase::Quick,
                });
                Ok(Resolution::Waiting)
            }
            Err(e) => {
                warn!(source = %request.source.display(), error = %e, "move failed");
                surface.notify(&Notice::GaveUp {
                    source: request.source.clone(),
                    reason: e.to_string(),
                });
                self.settle_unmoved(&request, intent).await?;
                Ok(Resolution::LeftInPlace)
            }
        }
    }

    /// A user decision is still a decision when its move never lands.
    async fn settle_unmoved(&self, request: &MoveRequest, intent: MoveIntent) -> anyhow::Result<()> {
        if let (true, Some(fb)) = (intent.user_decided, intent.feedback) {
            self.remember(feedback_record(&intent.file, &request.destination_dir, fb))
                .await?;
        }
        Ok(())
    }

    /// Log a completed move, record feedback, and open the undo window.
    async fn finish(
        &self,
        request: &MoveRequest,
        intent: MoveIntent,
        moved: Moved,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Resolution> {
        let source_dir = intent
            .file
            .path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = ActivityEntry {
            id: None,
            filename: moved.final_name.clone(),
            original_filename: moved.prior_name(),
            source: source_dir,
            destination: request.destination_dir.to_string_lossy().into_owned(),
            undone: false,
            created_at: now_millis(),
        };
        let entry_id = activity::record(&self.pool, &entry, self.cfg.undo.activity_cap).await?;
        if let Some(fb) = intent.feedback {
            self.remember(feedback_record(&intent.file, &request.destination_dir, fb))
                .await?;
        }
        self.undo.lock().await.open(entry_id, Instant::now());
        surface.notify(&Notice::Moved {
            entry_id,
            from: request.source.clone(),
            to: moved.to.clone(),
        });
        Ok(Resolution::Moved {
            entry_id,
            to: moved.to,
        })
    }

    async fn remember(&self, record: CorrectionRecord) -> anyhow::Result<()> {
        storage::corrections::append(&self.pool, &record, self.cfg.corrections.retain).await?;
        self.refresh_history().await
    }

    /// Classify every file of a burst together and ask once.
    pub async fn process_batch(
        self: &Arc<Self>,
        files: Vec<FileEvent>,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Vec<Resolution>> {
        let mut set = JoinSet::new();
        for (idx, file) in files.into_iter().enumerate() {
            let engine = Arc::clone(self);
            set.spawn(async move { (idx, engine.preview(&file, false).await) });
        }
        let mut proposals = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            proposals.push(joined?);
        }
        proposals.sort_by_key(|(idx, _)| *idx);

        let mut resolutions = Vec::with_capacity(proposals.len());
        let mut to_present = Vec::new();
        for (_, proposal) in proposals {
            match proposal.decision {
                Decision::Skip => resolutions.push(self.park(proposal, surface).await),
                Decision::AutoMove => resolutions.push(self.auto_move(proposal, surface).await?),
                Decision::Suggest | Decision::Review => to_present.push(proposal),
            }
        }
        if to_present.is_empty() {
            return Ok(resolutions);
        }

        info!(count = to_present.len(), "presenting batch");
        let answers = surface.present_batch(&to_present).await;
        let mut answers = answers.into_iter();
        for proposal in &to_present {
            let answer = answers.next().unwrap_or(UserDecision::IgnoreQuietly);
            resolutions.push(self.apply_decision(proposal, answer, surface, true).await?);
        }
        Ok(resolutions)
    }

    pub async fn skipped(&self) -> Vec<SkippedFile> {
        self.skipped.lock().await.clone()
    }

    /// Take a file back out of the skipped set and classify it as relevant.
    pub async fn rescue(
        &self,
        path: &Path,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Option<Resolution>> {
        let rescued = {
            let mut skipped = self.skipped.lock().await;
            let idx = skipped.iter().position(|s| s.file.path == path);
            idx.map(|i| skipped.remove(i))
        };
        let Some(rescued) = rescued else {
            return Ok(None);
        };
        info!(file = %rescued.file.name, "rescued from skipped");
        let proposal = self.preview(&rescued.file, true).await;
        self.settle(proposal, surface).await.map(Some)
    }

    /// Reverse the most recent move while its window is open.
    pub async fn undo(&self) -> Result<ActivityEntry, UndoError> {
        self.undo_at(Instant::now()).await
    }

    pub async fn undo_at(&self, now: Instant) -> Result<ActivityEntry, UndoError> {
        let entry_id = self.undo.lock().await.current(now)?;
        let reversed = activity::reverse(&self.pool, entry_id, self.cfg.corrections.retain).await;
        // A blocked restore keeps the window open for another try.
        if !matches!(reversed, Err(UndoError::Blocked(_)) | Err(UndoError::Store(_))) {
            self.undo.lock().await.close(entry_id);
        }
        let entry = reversed?;
        self.refresh_history().await?;
        Ok(entry)
    }

    pub async fn pending_moves(&self) -> usize {
        self.retries.lock().await.len()
    }

    pub async fn next_retry(&self) -> Option<Instant> {
        self.retries.lock().await.next_due()
    }

    /// Resolves once a move has been queued since the last call.
    pub async fn retry_queued(&self) {
        self.retry_added.notified().await
    }

    /// Attempt every retry that is due.
    pub async fn run_retries(
        &self,
        now: Instant,
        surface: &dyn DecisionSurface,
    ) -> anyhow::Result<Vec<Resolution>> {
        let results = self
            .retries
            .lock()
            .await
            .process_due(now, self.mover);

        let mut out = Vec::with_capacity(results.len());
        for result in results {
            match result {
                RetryResult::Completed { pending, outcome } => match outcome {
                    MoveOutcome::Moved(moved) => {
                        out.push(
                            self.finish(&pending.request, pending.intent, moved, surface)
                                .await?,
                        );
                    }
                    MoveOutcome::Skipped => {
                        self.settle_unmoved(&pending.request, pending.intent).await?;
                        out.push(Resolution::LeftInPlace);
                    }
                },
                RetryResult::Rescheduled { source, phase, .. } => {
                    surface.notify(&Notice::Waiting { source, phase });
                    out.push(Resolution::Waiting);
                }
                RetryResult::Abandoned { pending, error } => {
                    surface.notify(&Notice::GaveUp {
                        source: pending.request.source.clone(),
                        reason: error.to_string(),
                    });
                    self.settle_unmoved(&pending.request, pending.intent).await?;
                    out.push(Resolution::LeftInPlace);
                }
            }
        }
        Ok(out)
    }

    /// Queue a move directly, as if its first attempt had hit contention.
    pub async fn enqueue_retry(&self, request: MoveRequest, intent: MoveIntent, now: Instant) -> u64 {
        let id = self.retries.lock().await.enqueue(request, intent, now);
        self.retry_added.notify_one();
        id
    }
}

fn feedback_record(file: &FileEvent, destination: &Path, fb: Feedback) -> CorrectionRecord {
    CorrectionRecord {
        filename: file.name.clone(),
        suggested: fb.suggested,
        chosen: destination.to_string_lossy().into_owned(),
        outcome: fb.outcome,
        created_at: now_millis(),
    }
}

/// Register every available provider. The OpenAI-compatible service needs `OPENAI_API_KEY`;
/// `OPENAI_BASE_URL` overrides the endpoint.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let local = LocalExtractor::new(config.classification.min_extracted_chars);
    let mut reg = ProviderRegistry::new()
        .with_classifier("noop", Arc::new(NoopProvider))
        .with_extractor("local", Arc::new(local))
        .set_preferred_extractor("local");

    let mut preferred = "noop";
    if let Some(key) = std::env::var_os("OPENAI_API_KEY") {
        let base = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base,
            text_model: config.provider.text_model.clone(),
            vision_model: config.provider.vision_model.clone(),
            timeout: Duration::from_secs(config.provider.timeout_secs),
        });
        reg = reg.with_classifier("openai", Arc::new(provider));
        if config.provider.name == "openai" {
            preferred = "openai";
        }
    } else if config.provider.name == "openai" {
        warn!("OPENAI_API_KEY not set; classification falls back to rules and cache");
    }
    reg.set_preferred_classifier(preferred)
}
