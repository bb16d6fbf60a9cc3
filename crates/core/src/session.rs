//! A watch session: one coordinator loop that owns the batch buffer and drives
//! file tasks, retries and user commands.

use crate::activity::UndoError;
use crate::batch::{BatchCoordinator, Presentation};
use crate::models::{ActivityEntry, FileEvent};
use crate::pipeline::{DecisionSurface, Engine, Resolution, SkippedFile};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum SessionCommand {
    Undo(oneshot::Sender<Result<ActivityEntry, UndoError>>),
    Rescue(PathBuf),
    ListSkipped(oneshot::Sender<Vec<SkippedFile>>),
    /// Present whatever is buffered now instead of waiting out the debounce.
    Flush,
    Shutdown,
}

type FileTasks = JoinSet<anyhow::Result<Vec<Resolution>>>;

fn dispatch(
    engine: &Arc<Engine>,
    surface: &Arc<dyn DecisionSurface>,
    tasks: &mut FileTasks,
    presentation: Presentation,
) {
    match presentation {
        Presentation::Batch(files) => {
            info!(count = files.len(), "batch ready");
            let engine = Arc::clone(engine);
            let surface = Arc::clone(surface);
            tasks.spawn(async move { engine.process_batch(files, surface.as_ref()).await });
        }
        Presentation::Singles(files) => {
            for file in files {
                let engine = Arc::clone(engine);
                let surface = Arc::clone(surface);
                tasks.spawn(async move {
                    let res = engine.process_file(&file, surface.as_ref()).await?;
                    Ok(vec![res])
                });
            }
        }
    }
}

fn log_task(joined: Result<anyhow::Result<Vec<Resolution>>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(res)) => debug!(?res, "file task finished"),
        Ok(Err(e)) => warn!(error = %e, "file task failed"),
        Err(e) => warn!(error = %e, "file task panicked"),
    }
}

/// Run until the event channel closes or a shutdown command arrives. Buffered
/// files are flushed and in-flight tasks awaited before returning.
pub async fn run(
    engine: Arc<Engine>,
    surface: Arc<dyn DecisionSurface>,
    mut events: mpsc::Receiver<FileEvent>,
    mut commands: mpsc::Receiver<SessionCommand>,
) -> anyhow::Result<()> {
    let mut coordinator = BatchCoordinator::new(engine.config().batch.clone());
    let mut tasks: FileTasks = JoinSet::new();

    loop {
        let deadline = coordinator.deadline();
        let next_retry = engine.next_retry().await;
        tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => {
                    let name = ev.name.clone();
                    coordinator.ingest(ev, Instant::now());
                    debug!(file = %name, buffered = coordinator.pending(), "arrival");
                }
                None => break,
            },
            Some(cmd) = commands.recv() => match cmd {
                SessionCommand::Undo(reply) => {
                    let _ = reply.send(engine.undo().await);
                }
                SessionCommand::Rescue(path) => {
                    let engine = Arc::clone(&engine);
                    let surface = Arc::clone(&surface);
                    tasks.spawn(async move {
                        Ok(engine.rescue(&path, surface.as_ref()).await?.into_iter().collect())
                    });
                }
                SessionCommand::ListSkipped(reply) => {
                    let _ = reply.send(engine.skipped().await);
                }
                SessionCommand::Flush => {
                    if let Some(p) = coordinator.flush() {
                        dispatch(&engine, &surface, &mut tasks, p);
                    }
                }
                SessionCommand::Shutdown => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(p) = coordinator.poll(Instant::now()) {
                    dispatch(&engine, &surface, &mut tasks, p);
                }
            }
            _ = sleep_until(next_retry.unwrap_or_else(Instant::now)), if next_retry.is_some() => {
                if let Err(e) = engine.run_retries(Instant::now(), surface.as_ref()).await {
                    warn!(error = %e, "retry pass failed");
                }
            }
            // Re-read the queue's next due time.
            _ = engine.retry_queued() => {}
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_task(joined),
        }
    }

    if let Some(p) = coordinator.flush() {
        dispatch(&engine, &surface, &mut tasks, p);
    }
    while let Some(joined) = tasks.join_next().await {
        log_task(joined);
    }
    let waiting = engine.pending_moves().await;
    if waiting > 0 {
        warn!(waiting, "session ended with moves still waiting on busy files");
    }
    info!("session ended");
    Ok(())
}
