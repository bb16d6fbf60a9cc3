//! Activity log and the bounded undo window.

use crate::models::{now_millis, ActivityEntry, CorrectionRecord, Outcome};
use crate::mover::{self, MoveError};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("undo window has expired")]
    WindowExpired,
    #[error("move was already undone")]
    AlreadyUndone,
    #[error("cannot restore: {0}")]
    Blocked(#[from] MoveError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Single-shot window over the most recent move.
#[derive(Debug)]
pub struct UndoWindow {
    length: Duration,
    open: Option<(i64, Instant)>,
}

impl UndoWindow {
    pub fn new(length: Duration) -> Self {
        Self { length, open: None }
    }

    /// Open the window for a new move, superseding any earlier one.
    pub fn open(&mut self, entry_id: i64, now: Instant) {
        self.open = Some((entry_id, now));
    }

    /// The entry still undoable at `now`. Expiry closes the window.
    pub fn current(&mut self, now: Instant) -> Result<i64, UndoError> {
        let (id, at) = self.open.ok_or(UndoError::NothingToUndo)?;
        if now.duration_since(at) > self.length {
            self.open = None;
            return Err(UndoError::WindowExpired);
        }
        Ok(id)
    }

    /// Close the window after its move was reversed. A newer move keeps its window.
    pub fn close(&mut self, entry_id: i64) {
        if matches!(self.open, Some((id, _)) if id == entry_id) {
            self.open = None;
        }
    }
}

/// Where an entry's file lives now.
pub fn current_path(entry: &ActivityEntry) -> PathBuf {
    Path::new(&entry.destination).join(&entry.filename)
}

/// Where undo puts it back, under its pre-rename name.
pub fn restore_path(entry: &ActivityEntry) -> PathBuf {
    let name = entry.original_filename.as_deref().unwrap_or(&entry.filename);
    Path::new(&entry.source).join(name)
}

/// Append a completed move, pruning to `cap`.
pub async fn record(pool: &SqlitePool, entry: &ActivityEntry, cap: i64) -> anyhow::Result<i64> {
    storage::activity::append(pool, entry, cap).await
}

/// Reverse one logged move: restore file and name, flag the entry and append a
/// `corrected` record pointing back at the source folder.
pub async fn reverse(
    pool: &SqlitePool,
    entry_id: i64,
    retain_corrections: i64,
) -> Result<ActivityEntry, UndoError> {
    let entry = storage::activity::get(pool, entry_id)
        .await?
        .ok_or(UndoError::NothingToUndo)?;
    if entry.undone {
        return Err(UndoError::AlreadyUndone);
    }

    let from = current_path(&entry);
    let to = restore_path(&entry);
    mover::restore(&from, &to)?;

    if !storage::activity::mark_undone(pool, entry_id).await? {
        return Err(UndoError::AlreadyUndone);
    }
    let original = entry
        .original_filename
        .clone()
        .unwrap_or_else(|| entry.filename.clone());
    let correction = CorrectionRecord {
        filename: original,
        suggested: entry.destination.clone(),
        chosen: entry.source.clone(),
        outcome: Outcome::Corrected,
        created_at: now_millis(),
    };
    storage::corrections::append(pool, &correction, retain_corrections).await?;
    info!(file = %entry.filename, back_to = %to.display(), "undone");

    Ok(ActivityEntry {
        undone: true,
        ..entry
    })
}

/// Undo the most recent move from a fresh process, judging the window by the
/// logged timestamp.
pub async fn undo_latest(
    pool: &SqlitePool,
    window: Duration,
    now_ms: i64,
    retain_corrections: i64,
) -> Result<ActivityEntry, UndoError> {
    let latest = storage::activity::latest(pool)
        .await?
        .ok_or(UndoError::NothingToUndo)?;
    if latest.undone {
        return Err(UndoError::AlreadyUndone);
    }
    if now_ms - latest.created_at > window.as_millis() as i64 {
        return Err(UndoError::WindowExpired);
    }
    let id = latest.id.ok_or(UndoError::NothingToUndo)?;
    reverse(pool, id, retain_corrections).await
}
