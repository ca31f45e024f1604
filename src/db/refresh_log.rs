use crate::cache::MetricKey;
use crate::db::{from_millis, to_millis, StoreError};
use crate::models::{RefreshLogPatch, RefreshLogRecord, RefreshStatus};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub async fn append_refresh_log(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    started_at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO refresh_log (metric_key, started_at, status) VALUES (?, ?, ?)",
    )
    .bind(key.to_string())
    .bind(to_millis(started_at))
    .bind(RefreshStatus::Running.as_str())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn update_refresh_log(
    pool: &Pool<Sqlite>,
    id: i64,
    patch: &RefreshLogPatch,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"UPDATE refresh_log
           SET completed_at = ?, status = ?, ttl_used = ?, error_message = ?
           WHERE id = ?"#,
    )
    .bind(to_millis(patch.completed_at))
    .bind(patch.status.as_str())
    .bind(patch.ttl_used.map(|ttl| ttl as i64))
    .bind(patch.error_message.as_deref())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent refresh attempts for a key, newest first.
pub async fn recent_refresh_logs(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    limit: i64,
) -> Result<Vec<RefreshLogRecord>, StoreError> {
    let rows = sqlx::query(
        r#"SELECT id, metric_key, started_at, completed_at, status, ttl_used, error_message
           FROM refresh_log
           WHERE metric_key = ?
           ORDER BY started_at DESC, id DESC
           LIMIT ?"#,
    )
    .bind(key.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<RefreshLogRecord, StoreError> {
            let status: String = row.try_get("status")?;
            let completed_at: Option<i64> = row.try_get("completed_at")?;
            let ttl_used: Option<i64> = row.try_get("ttl_used")?;
            Ok(RefreshLogRecord {
                id: row.try_get("id")?,
                key: row.try_get("metric_key")?,
                started_at: from_millis(row.try_get("started_at")?)?,
                completed_at: completed_at.map(from_millis).transpose()?,
                status: RefreshStatus::parse(&status)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown status {}", status)))?,
                ttl_used: ttl_used.map(|ttl| ttl as u64),
                error_message: row.try_get("error_message")?,
            })
        })
        .collect()
}
