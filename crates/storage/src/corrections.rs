use crate::models::{CorrectionRecord, CorrectionRow};
use sqlx::SqlitePool;
use tracing::debug;

/// Append a record and prune everything beyond the newest `retain`.
pub async fn append(
    pool: &SqlitePool,
    record: &CorrectionRecord,
    retain: i64,
) -> anyhow::Result<i64> {
    let res = sqlx::query(
        "INSERT INTO corrections (filename, suggested, chosen, outcome, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&record.filename)
    .bind(&record.suggested)
    .bind(&record.chosen)
    .bind(record.outcome.as_str())
    .bind(record.created_at)
    .execute(pool)
    .await?;
    let id = res.last_insert_rowid();

    let pruned = sqlx::query(
        "DELETE FROM corrections WHERE id NOT IN (
            SELECT id FROM corrections ORDER BY created_at DESC, id DESC LIMIT ?1
        )",
    )
    .bind(retain)
    .execute(pool)
    .await?;
    if pruned.rows_affected() > 0 {
        debug!(pruned = pruned.rows_affected(), "corrections trimmed");
    }

    Ok(id)
}

/// Full scan in chronological order.
pub async fn list(pool: &SqlitePool) -> anyhow::Result<Vec<CorrectionRecord>> {
    let rows = sqlx::query_as::<_, CorrectionRow>(
        "SELECT filename, suggested, chosen, outcome, created_at
         FROM corrections ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    let records = rows
        .into_iter()
        .map(CorrectionRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub async fn clear(pool: &SqlitePool) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM corrections").execute(pool).await?;
    Ok(res.rows_affected())
}
