use crate::models::ActivityEntry;
use sqlx::SqlitePool;
use tracing::debug;

const SELECT: &str = "SELECT id, filename, original_filename, source, destination, undone, created_at FROM activity";

/// Append an entry and prune everything beyond the newest `cap`.
pub async fn append(pool: &SqlitePool, entry: &ActivityEntry, cap: i64) -> anyhow::Result<i64> {
    let res = sqlx::query(
        "INSERT INTO activity (filename, original_filename, source, destination, undone, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(&entry.filename)
    .bind(&entry.original_filename)
    .bind(&entry.source)
    .bind(&entry.destination)
    .bind(entry.undone)
    .bind(entry.created_at)
    .execute(pool)
    .await?;
    let id = res.last_insert_rowid();

    let pruned = sqlx::query(
        "DELETE FROM activity WHERE id NOT IN (
            SELECT id FROM activity ORDER BY created_at DESC, id DESC LIMIT ?1
        )",
    )
    .bind(cap)
    .execute(pool)
    .await?;
    if pruned.rows_affected() > 0 {
        debug!(pruned = pruned.rows_affected(), "activity trimmed");
    }

    Ok(id)
}

/// Newest first.
pub async fn list(pool: &SqlitePool) -> anyhow::Result<Vec<ActivityEntry>> {
    let entries = sqlx::query_as::<_, ActivityEntry>(&format!(
        "{} ORDER BY created_at DESC, id DESC",
        SELECT
    ))
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

pub async fn get(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<ActivityEntry>> {
    let entry = sqlx::query_as::<_, ActivityEntry>(&format!("{} WHERE id = ?1", SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(entry)
}

/// The most recent entry, undone or not.
pub async fn latest(pool: &SqlitePool) -> anyhow::Result<Option<ActivityEntry>> {
    let entry = sqlx::query_as::<_, ActivityEntry>(&format!(
        "{} ORDER BY created_at DESC, id DESC LIMIT 1",
        SELECT
    ))
    .fetch_optional(pool)
    .await?;
    Ok(entry)
}

/// Flip `undone`. Returns false when the entry is missing or was already undone.
pub async fn mark_undone(pool: &SqlitePool, id: i64) -> anyhow::Result<bool> {
    let res = sqlx::query("UPDATE activity SET undone = 1 WHERE id = ?1 AND undone = 0")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}
