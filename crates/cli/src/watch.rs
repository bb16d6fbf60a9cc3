use crate::console::{self, Console};
use anyhow::{Context, Result};
use autosort_core::config::AppConfig;
use autosort_core::models::FileEvent;
use autosort_core::pipeline::{build_registry, DecisionSurface, Engine};
use autosort_core::session::{self, SessionCommand};
use notify::event::{CreateKind, EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

const PARTIAL_SUFFIXES: &[&str] = &["crdownload", "part", "partial", "download", "tmp", "opdownload"];

/// Whether a path looks like a finished, user-visible file.
pub fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with("~$") || name.eq_ignore_ascii_case("desktop.ini") {
        return false;
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    !PARTIAL_SUFFIXES.contains(&ext.as_str())
}

/// The path a notify event delivers, if it is a new arrival.
pub fn arrival(kind: &EventKind, paths: &[PathBuf]) -> Option<PathBuf> {
    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => {
            paths.first().cloned()
        }
        // Browsers finish downloads by renaming the partial file.
        EventKind::Modify(ModifyKind::Name(_)) => paths.last().cloned(),
        _ => None,
    }
}

/// Existing files directly inside `dir`, oldest name first.
pub fn sweep_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_candidate(p))
        .collect();
    files.sort();
    files
}

pub fn spawn_watcher(dirs: &[PathBuf], tx: mpsc::Sender<FileEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(ev) => {
                let Some(path) = arrival(&ev.kind, &ev.paths) else {
                    return;
                };
                if !path.is_file() || !is_candidate(&path) {
                    return;
                }
                match FileEvent::from_path(&path) {
                    Ok(event) => {
                        let _ = tx.blocking_send(event);
                    }
                    Err(e) => debug!(path = %path.display(), error = %e, "arrival vanished"),
                }
            }
            Err(e) => warn!(error = %e, "watch error"),
        },
        notify::Config::default(),
    )?;
    for dir in dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;
    }
    Ok(watcher)
}

async fn start(cfg: &AppConfig) -> Result<(Arc<Engine>, Arc<Console>, mpsc::Receiver<SessionCommand>)> {
    let registry = build_registry(cfg);
    let engine = Arc::new(Engine::open(cfg.clone(), &registry).await?);
    let console = Console::new(engine.destinations().to_vec());
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    tokio::spawn(console::drive(
        Arc::clone(&console),
        console::spawn_stdin_reader(),
        cmd_tx,
    ));
    Ok((engine, console, cmd_rx))
}

pub async fn watch_paths(cfg: AppConfig, paths: Vec<String>) -> Result<()> {
    let source = if paths.is_empty() {
        cfg.watch.paths.clone()
    } else {
        paths
    };
    let mut dirs: Vec<PathBuf> = source.into_iter().map(PathBuf::from).collect();
    if dirs.is_empty() {
        dirs.push(PathBuf::from("."));
    }
    if cfg.watch.destinations.is_empty() {
        warn!("no destinations configured; every file will need review");
    }

    let (engine, console, cmd_rx) = start(&cfg).await?;
    let (tx, rx) = mpsc::channel(256);
    let _watcher = spawn_watcher(&dirs, tx)?;
    println!("Watching {} path(s)... (h for help)", dirs.len());
    let surface: Arc<dyn DecisionSurface> = console;
    session::run(engine, surface, rx, cmd_rx).await
}

/// Feed the files already sitting in `dir` through a session, then stop.
pub async fn sweep(cfg: AppConfig, dir: Option<String>) -> Result<()> {
    let dir = dir
        .or_else(|| cfg.watch.paths.first().cloned())
        .map(PathBuf::from)
        .context("no directory given and no watch path configured")?;
    let files = sweep_files(&dir);
    println!("{} file(s) in {}", files.len(), dir.display());

    let (engine, console, cmd_rx) = start(&cfg).await?;
    let (tx, rx) = mpsc::channel(files.len().max(1));
    for path in files {
        match FileEvent::from_path(&path) {
            Ok(ev) => tx.send(ev).await?,
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    drop(tx);
    let surface: Arc<dyn DecisionSurface> = console;
    session::run(engine, surface, rx, cmd_rx).await
}
