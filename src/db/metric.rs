use crate::cache::MetricKey;
use crate::db::{from_millis, to_millis, StoreError};
use crate::models::CacheEntry;
use sqlx::{Pool, Row, Sqlite};

pub async fn upsert_metric(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    entry: &CacheEntry,
) -> Result<(), StoreError> {
    let value = serde_json::to_string(&entry.value)?;
    let metadata = serde_json::to_string(&entry.metadata)?;

    // Last writer wins by computed_at, so a slow process cannot roll a row back
    sqlx::query(
        r#"
        INSERT INTO metric_values
        (subject, metric, period, value, computed_at, ttl_seconds, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(subject, metric, period) DO UPDATE SET
            value = excluded.value,
            computed_at = excluded.computed_at,
            ttl_seconds = excluded.ttl_seconds,
            metadata = excluded.metadata
        WHERE excluded.computed_at >= metric_values.computed_at
        "#,
    )
    .bind(&key.subject)
    .bind(&key.metric)
    .bind(&key.period)
    .bind(value)
    .bind(to_millis(entry.computed_at))
    .bind(entry.ttl_seconds as i64)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_latest_metric(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
) -> Result<Option<CacheEntry>, StoreError> {
    let row = sqlx::query(
        r#"SELECT value, computed_at, ttl_seconds, metadata
           FROM metric_values
           WHERE subject = ? AND metric = ? AND period = ?
           ORDER BY computed_at DESC
           LIMIT 1"#,
    )
    .bind(&key.subject)
    .bind(&key.metric)
    .bind(&key.period)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let value: String = row.try_get("value")?;
    let metadata: String = row.try_get("metadata")?;
    let ttl_seconds: i64 = row.try_get("ttl_seconds")?;
    if ttl_seconds <= 0 {
        return Err(StoreError::Corrupt(format!(
            "non-positive ttl {} for {}",
            ttl_seconds, key
        )));
    }

    Ok(Some(CacheEntry {
        value: serde_json::from_str(&value)?,
        computed_at: from_millis(row.try_get("computed_at")?)?,
        ttl_seconds: ttl_seconds as u64,
        metadata: serde_json::from_str(&metadata)?,
    }))
}
