use autosort_core::activity::UndoError;
use autosort_core::classifier::{Classifier, EscalationPolicy};
use autosort_core::config::AppConfig;
use autosort_core::extractor::LocalExtractor;
use autosort_core::models::{FileEvent, Outcome};
use autosort_core::mover::{self, ConflictPolicy, MoveError, MoveOutcome, MoveRequest};
use autosort_core::pipeline::{
    DecisionSurface, Engine, Feedback, MoveIntent, Proposal, Resolution, UserDecision,
};
use autosort_core::session::{self, SessionCommand};
use providers::{ClassificationService, ClassifyRequest, Judgement, ProviderError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Answers every pass with the same judgement and counts calls.
struct FixedService {
    judgement: Judgement,
    calls: AtomicUsize,
}

impl FixedService {
    fn new(destination: &str, confidence: f32) -> Arc<Self> {
        Arc::new(Self {
            judgement: Judgement {
                is_relevant: true,
                destination: destination.into(),
                confidence,
                rationale: "from filename".into(),
                suggested_rename: None,
            },
            calls: AtomicUsize::new(0),
        })
    }

    fn irrelevant() -> Arc<Self> {
        Arc::new(Self {
            judgement: Judgement {
                is_relevant: false,
                destination: String::new(),
                confidence: 0.0,
                rationale: "installer".into(),
                suggested_rename: None,
            },
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<Judgement, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.judgement.clone())
    }
}

#[async_trait::async_trait]
impl ClassificationService for FixedService {
    async fn classify(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        self.answer()
    }
    async fn classify_with_content(
        &self,
        _req: &ClassifyRequest<'_>,
        _content: &str,
    ) -> Result<Judgement, ProviderError> {
        self.answer()
    }
    async fn classify_image(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        self.answer()
    }
}

/// Name pass and content pass disagree; records which passes ran.
struct SplitService {
    by_name: Judgement,
    by_content: Judgement,
    passes: Mutex<Vec<&'static str>>,
}

impl SplitService {
    fn new(name_dest: &str, content_dest: &str) -> Arc<Self> {
        let judgement = |dest: &str| Judgement {
            is_relevant: true,
            destination: dest.into(),
            confidence: 0.95,
            rationale: "scripted".into(),
            suggested_rename: None,
        };
        Arc::new(Self {
            by_name: judgement(name_dest),
            by_content: judgement(content_dest),
            passes: Mutex::new(Vec::new()),
        })
    }

    fn passes(&self) -> Vec<&'static str> {
        self.passes.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ClassificationService for SplitService {
    async fn classify(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        self.passes.lock().unwrap().push("name");
        Ok(self.by_name.clone())
    }
    async fn classify_with_content(
        &self,
        _req: &ClassifyRequest<'_>,
        _content: &str,
    ) -> Result<Judgement, ProviderError> {
        self.passes.lock().unwrap().push("content");
        Ok(self.by_content.clone())
    }
    async fn classify_image(&self, _req: &ClassifyRequest<'_>) -> Result<Judgement, ProviderError> {
        self.passes.lock().unwrap().push("image");
        Ok(self.by_name.clone())
    }
}

#[derive(Default)]
struct ScriptedSurface {
    answers: Mutex<VecDeque<UserDecision>>,
    presented: AtomicUsize,
    batches: Mutex<Vec<usize>>,
}

impl ScriptedSurface {
    fn answering(answers: Vec<UserDecision>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Default::default()
        }
    }

    fn next(&self) -> UserDecision {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UserDecision::IgnoreQuietly)
    }
}

#[async_trait::async_trait]
impl DecisionSurface for ScriptedSurface {
    async fn present(&self, _proposal: &Proposal) -> UserDecision {
        self.presented.fetch_add(1, Ordering::SeqCst);
        self.next()
    }

    async fn present_batch(&self, proposals: &[Proposal]) -> Vec<UserDecision> {
        self.batches.lock().unwrap().push(proposals.len());
        proposals.iter().map(|_| self.next()).collect()
    }

    async fn resolve_collision(&self, _file: &FileEvent, _target: &Path) -> ConflictPolicy {
        ConflictPolicy::KeepBoth
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    inbox: PathBuf,
    ml: PathBuf,
    econ: PathBuf,
    cfg: AppConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("Downloads");
    let ml = dir.path().join("courses").join("ML");
    let econ = dir.path().join("courses").join("Econ");
    for d in [&inbox, &ml, &econ] {
        std::fs::create_dir_all(d).unwrap();
    }
    let mut cfg = AppConfig::default();
    cfg.database.path = dir.path().join("autosort.db").to_string_lossy().into_owned();
    cfg.watch.paths = vec![inbox.to_string_lossy().into_owned()];
    cfg.watch.destinations = vec![
        ml.to_string_lossy().into_owned(),
        econ.to_string_lossy().into_owned(),
    ];
    cfg.classification.escalate_documents = false;
    Fixture {
        _dir: dir,
        inbox,
        ml,
        econ,
        cfg,
    }
}

async fn build(cfg: &AppConfig, service: Arc<dyn ClassificationService>) -> Engine {
    let pool = storage::open(&cfg.database.path).await.unwrap();
    let classifier = Classifier::new(
        service,
        Arc::new(LocalExtractor::new(cfg.classification.min_extracted_chars)),
        EscalationPolicy::from(&cfg.classification),
    );
    Engine::from_parts(cfg.clone(), pool, classifier).await.unwrap()
}

async fn engine(cfg: &AppConfig, service: Arc<FixedService>) -> Arc<Engine> {
    Arc::new(build(cfg, service).await)
}

/// Reports the destination as busy while `<name>.lock` sits next to the source.
fn busy_while_locked(req: &MoveRequest) -> Result<MoveOutcome, MoveError> {
    let lock = req.source.with_extension("lock");
    if lock.exists() {
        return Err(MoveError::Contention(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        )));
    }
    mover::move_file(req)
}

fn arrive(dir: &Path, name: &str) -> FileEvent {
    let path = dir.join(name);
    std::fs::write(&path, b"contents").unwrap();
    FileEvent::from_path(&path).unwrap()
}

#[tokio::test]
async fn confident_name_pass_auto_moves_with_one_call() {
    let fx = fixture();
    let service = FixedService::new("ML", 0.92);
    let engine = engine(&fx.cfg, service.clone()).await;
    let surface = ScriptedSurface::default();

    let file = arrive(&fx.inbox, "Lecture5_ML.pdf");
    let res = engine.process_file(&file, &surface).await.unwrap();

    assert!(matches!(res, Resolution::Moved { ref to, .. } if *to == fx.ml.join("Lecture5_ML.pdf")));
    assert_eq!(service.calls(), 1);
    assert_eq!(surface.presented.load(Ordering::SeqCst), 0);
    assert!(!file.path.exists());

    let activity = storage::activity::list(engine.pool()).await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].filename, "Lecture5_ML.pdf");

    let history = storage::corrections::list(engine.pool()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Accepted);
    assert_eq!(history[0].chosen, fx.ml.to_string_lossy());
}

#[tokio::test]
async fn rule_hit_moves_without_calling_the_service() {
    let fx = fixture();
    let service = FixedService::new("Econ", 0.99);
    let engine = engine(&fx.cfg, service.clone()).await;
    storage::rules::add(engine.pool(), "lecture*", &fx.ml.to_string_lossy(), 1)
        .await
        .unwrap();
    engine.reload_rules().await.unwrap();

    let file = arrive(&fx.inbox, "Lecture6_ML.pdf");
    let res = engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();
    assert!(matches!(res, Resolution::Moved { .. }));
    assert_eq!(service.calls(), 0);
    assert!(fx.ml.join("Lecture6_ML.pdf").exists());
    assert!(storage::corrections::list(engine.pool()).await.unwrap().is_empty());
}

#[tokio::test]
async fn undo_restores_and_records_a_correction() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.95)).await;
    let file = arrive(&fx.inbox, "Lecture5_ML.pdf");
    engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();

    let entry = engine.undo().await.unwrap();
    assert!(entry.undone);
    assert!(file.path.exists());
    assert!(!fx.ml.join("Lecture5_ML.pdf").exists());

    let history = engine.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].outcome, Outcome::Corrected);
    assert_eq!(history[1].chosen, fx.inbox.to_string_lossy());

    assert!(matches!(engine.undo().await, Err(UndoError::NothingToUndo)));
    let stored = storage::activity::list(engine.pool()).await.unwrap();
    assert!(stored[0].undone);
}

#[tokio::test]
async fn undo_after_window_is_rejected() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.95)).await;
    let file = arrive(&fx.inbox, "Lecture5_ML.pdf");
    engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();

    let late = Instant::now() + Duration::from_secs(11);
    assert!(matches!(engine.undo_at(late).await, Err(UndoError::WindowExpired)));
    assert!(fx.ml.join("Lecture5_ML.pdf").exists());
}

#[tokio::test]
async fn correction_feeds_the_cache() {
    let fx = fixture();
    let service = FixedService::new("ML", 0.6);
    let engine = engine(&fx.cfg, service.clone()).await;
    let econ = fx.econ.to_string_lossy().into_owned();
    let surface = ScriptedSurface::answering(vec![UserDecision::ChooseAlternate(econ.clone())]);

    let file = arrive(&fx.inbox, "romer.pdf");
    let res = engine.process_file(&file, &surface).await.unwrap();
    assert!(matches!(res, Resolution::Moved { .. }));
    assert_eq!(surface.presented.load(Ordering::SeqCst), 1);

    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Corrected);
    assert_eq!(history[0].suggested, fx.ml.to_string_lossy());
    assert_eq!(history[0].chosen, econ);

    // Same name again: answered from history, straight to Econ.
    let again = arrive(&fx.inbox, "romer.pdf");
    engine.process_file(&again, &surface).await.unwrap();
    assert_eq!(service.calls(), 1);
    assert!(fx.econ.join("romer_1.pdf").exists());
}

#[tokio::test]
async fn dismiss_is_recorded_and_ignore_is_not() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.5)).await;
    let surface =
        ScriptedSurface::answering(vec![UserDecision::Dismiss, UserDecision::IgnoreQuietly]);

    let a = arrive(&fx.inbox, "meme.png");
    let b = arrive(&fx.inbox, "other.txt");
    assert_eq!(engine.process_file(&a, &surface).await.unwrap(), Resolution::Dismissed);
    assert_eq!(engine.process_file(&b, &surface).await.unwrap(), Resolution::Ignored);

    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Dismissed);
    assert!(a.path.exists() && b.path.exists());
}

#[tokio::test]
async fn irrelevant_files_can_be_rescued() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::irrelevant()).await;
    let surface = ScriptedSurface::answering(vec![UserDecision::ChooseAlternate(
        fx.ml.to_string_lossy().into_owned(),
    )]);

    let file = arrive(&fx.inbox, "setup.exe");
    assert_eq!(engine.process_file(&file, &surface).await.unwrap(), Resolution::Skipped);
    assert_eq!(engine.skipped().await.len(), 1);

    let rescued = engine.rescue(&file.path, &surface).await.unwrap();
    assert!(matches!(rescued, Some(Resolution::Moved { .. })));
    assert!(engine.skipped().await.is_empty());
    assert!(fx.ml.join("setup.exe").exists());

    assert!(engine.rescue(&file.path, &surface).await.unwrap().is_none());
}

#[tokio::test]
async fn retried_move_logs_once_when_it_lands() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.95)).await;
    let surface = ScriptedSurface::default();
    let file = arrive(&fx.inbox, "Lecture7_ML.pdf");

    let t0 = Instant::now();
    engine
        .enqueue_retry(
            MoveRequest::new(&file.path, &fx.ml),
            MoveIntent {
                file: file.clone(),
                feedback: Some(Feedback {
                    suggested: fx.ml.to_string_lossy().into_owned(),
                    outcome: Outcome::Accepted,
                }),
                user_decided: false,
            },
            t0,
        )
        .await;

    assert!(engine
        .run_retries(t0 + Duration::from_secs(1), &surface)
        .await
        .unwrap()
        .is_empty());
    let done = engine
        .run_retries(t0 + Duration::from_secs(2), &surface)
        .await
        .unwrap();
    assert!(matches!(done[..], [Resolution::Moved { .. }]));
    assert_eq!(engine.pending_moves().await, 0);
    assert_eq!(storage::activity::list(engine.pool()).await.unwrap().len(), 1);
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn session_presents_a_burst_as_one_batch() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.6)).await;
    let surface = Arc::new(ScriptedSurface::answering(vec![
        UserDecision::Accept,
        UserDecision::Accept,
    ]));

    let (tx, rx) = mpsc::channel(16);
    let (_cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(4);
    let first = arrive(&fx.inbox, "PS1.pdf");
    let second = arrive(&fx.inbox, "PS2.pdf");
    tx.send(FileEvent { arrived_at: 0, ..first }).await.unwrap();
    tx.send(FileEvent { arrived_at: 900, ..second }).await.unwrap();
    drop(tx);

    session::run(engine.clone(), surface.clone(), rx, cmd_rx)
        .await
        .unwrap();

    assert_eq!(*surface.batches.lock().unwrap(), vec![2]);
    assert_eq!(surface.presented.load(Ordering::SeqCst), 0);
    assert!(fx.ml.join("PS1.pdf").exists());
    assert!(fx.ml.join("PS2.pdf").exists());
    assert_eq!(engine.history().await.len(), 2);
}

#[tokio::test]
async fn unknown_alternate_is_not_moved_or_learned() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.6)).await;
    let surface = ScriptedSurface::answering(vec![UserDecision::ChooseAlternate("u".into())]);

    let file = arrive(&fx.inbox, "romer.pdf");
    let res = engine.process_file(&file, &surface).await.unwrap();

    assert_eq!(res, Resolution::LeftInPlace);
    assert!(file.path.exists());
    assert!(!Path::new("u").join("romer.pdf").exists());
    assert!(engine.history().await.is_empty());
    assert!(storage::activity::list(engine.pool()).await.unwrap().is_empty());
}

#[tokio::test]
async fn blocked_undo_can_be_retried_within_the_window() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.95)).await;
    let file = arrive(&fx.inbox, "Lecture5_ML.pdf");
    engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();

    // A new download took the old name.
    std::fs::write(&file.path, b"newer").unwrap();
    assert!(matches!(engine.undo().await, Err(UndoError::Blocked(_))));
    assert!(fx.ml.join("Lecture5_ML.pdf").exists());

    std::fs::remove_file(&file.path).unwrap();
    let entry = engine.undo().await.unwrap();
    assert!(entry.undone);
    assert_eq!(std::fs::read(&file.path).unwrap(), b"contents");
    assert!(matches!(engine.undo().await, Err(UndoError::NothingToUndo)));
}

#[tokio::test]
async fn documents_escalate_to_their_text() {
    let mut fx = fixture();
    fx.cfg.classification.escalate_documents = true;
    let econ = fx.econ.to_string_lossy().into_owned();
    let service = SplitService::new("ML", "Econ");
    let engine = build(&fx.cfg, service.clone()).await;
    let surface = ScriptedSurface::default();

    let path = fx.inbox.join("notes.txt");
    std::fs::write(&path, "Solow growth model, steady state capital and the golden rule").unwrap();
    let file = FileEvent::from_path(&path).unwrap();
    let res = engine.process_file(&file, &surface).await.unwrap();

    assert!(matches!(res, Resolution::Moved { ref to, .. } if *to == fx.econ.join("notes.txt")));
    assert_eq!(service.passes(), vec!["name", "content"]);
    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].suggested, econ);
}

#[tokio::test]
async fn thin_document_text_falls_back_to_the_name_pass() {
    let mut fx = fixture();
    fx.cfg.classification.escalate_documents = true;
    let service = SplitService::new("ML", "Econ");
    let engine = build(&fx.cfg, service.clone()).await;

    let path = fx.inbox.join("hw3.txt");
    std::fs::write(&path, "see pdf").unwrap();
    let file = FileEvent::from_path(&path).unwrap();
    let res = engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();

    assert!(matches!(res, Resolution::Moved { ref to, .. } if *to == fx.ml.join("hw3.txt")));
    assert_eq!(service.passes(), vec!["name"]);
}

#[tokio::test]
async fn busy_destination_queues_the_move() {
    let fx = fixture();
    let engine = build(&fx.cfg, FixedService::new("ML", 0.95))
        .await
        .with_mover(busy_while_locked);
    let surface = ScriptedSurface::default();
    let file = arrive(&fx.inbox, "Lecture8_ML.pdf");
    let lock = file.path.with_extension("lock");
    std::fs::write(&lock, b"").unwrap();

    let res = engine.process_file(&file, &surface).await.unwrap();
    assert_eq!(res, Resolution::Waiting);
    assert_eq!(engine.pending_moves().await, 1);
    assert!(file.path.exists());
    assert!(engine.history().await.is_empty());

    // Still busy on the first retry.
    let first = engine.next_retry().await.unwrap();
    let again = engine.run_retries(first, &surface).await.unwrap();
    assert_eq!(again, vec![Resolution::Waiting]);

    std::fs::remove_file(&lock).unwrap();
    let second = engine.next_retry().await.unwrap();
    assert!(second > first);
    let done = engine.run_retries(second, &surface).await.unwrap();
    assert!(matches!(done[..], [Resolution::Moved { .. }]));
    assert!(fx.ml.join("Lecture8_ML.pdf").exists());
    assert_eq!(engine.pending_moves().await, 0);
    assert_eq!(engine.history().await.len(), 1);
}

#[tokio::test]
async fn missing_source_is_never_queued() {
    let fx = fixture();
    let engine = engine(&fx.cfg, FixedService::new("ML", 0.95)).await;
    let file = arrive(&fx.inbox, "Lecture9_ML.pdf");
    std::fs::remove_file(&file.path).unwrap();

    let res = engine
        .process_file(&file, &ScriptedSurface::default())
        .await
        .unwrap();
    assert_eq!(res, Resolution::LeftInPlace);
    assert_eq!(engine.pending_moves().await, 0);
    assert!(engine.next_retry().await.is_none());
    assert!(storage::activity::list(engine.pool()).await.unwrap().is_empty());
    assert!(engine.history().await.is_empty());
}
