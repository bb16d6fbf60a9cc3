use anyhow::Result;
use autosort_core::activity::{self, UndoError};
use autosort_core::config::AppConfig;
use autosort_core::models::{now_millis, ActivityEntry};

/// Undo the most recent move from outside a watch session.
pub async fn undo_latest(cfg: &AppConfig) -> Result<Result<ActivityEntry, UndoError>> {
    let pool = storage::open(&cfg.database.path).await?;
    Ok(activity::undo_latest(
        &pool,
        cfg.undo.window(),
        now_millis(),
        cfg.corrections.retain,
    )
    .await)
}

pub async fn run_undo(cfg: AppConfig) -> Result<()> {
    match undo_latest(&cfg).await? {
        Ok(entry) => {
            let name = entry
                .original_filename
                .as_deref()
                .unwrap_or(&entry.filename);
            println!("restored {} to {}", name, entry.source);
        }
        Err(UndoError::Store(e)) => return Err(e),
        Err(e) => println!("cannot undo: {}", e),
    }
    Ok(())
}
