use crate::models::ClassificationRule;
use sqlx::SqlitePool;

pub async fn add(
    pool: &SqlitePool,
    pattern: &str,
    destination: &str,
    created_at: i64,
) -> anyhow::Result<i64> {
    let res = sqlx::query("INSERT INTO rules (pattern, destination, created_at) VALUES (?1, ?2, ?3)")
        .bind(pattern)
        .bind(destination)
        .bind(created_at)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

/// All rules in evaluation order (oldest first).
pub async fn list(pool: &SqlitePool) -> anyhow::Result<Vec<ClassificationRule>> {
    let rules = sqlx::query_as::<_, ClassificationRule>(
        "SELECT id, pattern, destination, created_at FROM rules ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rules)
}

pub async fn delete(pool: &SqlitePool, id: i64) -> anyhow::Result<bool> {
    let res = sqlx::query("DELETE FROM rules WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rules_keep_insertion_order() {
        let pool = crate::test_pool().await;
        let a = add(&pool, "*_ML_*", "/courses/ML", 10).await.unwrap();
        add(&pool, "Lecture*", "/courses/Lectures", 20).await.unwrap();

        let rules = list(&pool).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "*_ML_*");
        assert_eq!(rules[1].destination, "/courses/Lectures");

        assert!(delete(&pool, a).await.unwrap());
        assert!(!delete(&pool, 999).await.unwrap());
        assert_eq!(list(&pool).await.unwrap().len(), 1);
    }
}
