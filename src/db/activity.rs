// Source-event activity and precomputed TTL hints, written by the ingestion side and read
// by the TTL estimator.

use crate::cache::MetricKey;
use crate::db::{from_millis, to_millis, StoreError};
use crate::models::ActivitySignal;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Row, Sqlite};

pub async fn record_event(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    occurred_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO source_events (subject, metric, occurred_at) VALUES (?, ?, ?)")
        .bind(&key.subject)
        .bind(&key.metric)
        .bind(to_millis(occurred_at))
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn read_activity_signal(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    now: DateTime<Utc>,
) -> Result<ActivitySignal, StoreError> {
    let day_ago = to_millis(now - Duration::hours(24));
    let week_ago = to_millis(now - Duration::days(7));

    let row = sqlx::query(
        r#"SELECT
              COUNT(CASE WHEN occurred_at >= ? THEN 1 END) AS last_24h,
              COUNT(*) AS last_7d,
              (SELECT MAX(occurred_at) FROM source_events
               WHERE subject = ? AND metric = ?) AS last_event
           FROM source_events
           WHERE subject = ? AND metric = ? AND occurred_at >= ?"#,
    )
    .bind(day_ago)
    .bind(&key.subject)
    .bind(&key.metric)
    .bind(&key.subject)
    .bind(&key.metric)
    .bind(week_ago)
    .fetch_one(pool)
    .await?;

    let last_24h: i64 = row.try_get("last_24h")?;
    let last_7d: i64 = row.try_get("last_7d")?;
    let last_event: Option<i64> = row.try_get("last_event")?;

    Ok(ActivitySignal {
        events_last_24h: last_24h.max(0) as u64,
        events_last_7d: last_7d.max(0) as u64,
        last_event_at: last_event.map(from_millis).transpose()?,
    })
}

pub async fn set_recommended_ttl(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
    ttl_seconds: u64,
    updated_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO ttl_hints (subject, metric, ttl_seconds, updated_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(subject, metric) DO UPDATE SET
               ttl_seconds = excluded.ttl_seconds,
               updated_at = excluded.updated_at"#,
    )
    .bind(&key.subject)
    .bind(&key.metric)
    .bind(ttl_seconds as i64)
    .bind(to_millis(updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn recommended_ttl(
    pool: &Pool<Sqlite>,
    key: &MetricKey,
) -> Result<Option<u64>, StoreError> {
    let ttl: Option<i64> =
        sqlx::query_scalar("SELECT ttl_seconds FROM ttl_hints WHERE subject = ? AND metric = ?")
            .bind(&key.subject)
            .bind(&key.metric)
            .fetch_optional(pool)
            .await?;

    Ok(ttl.filter(|ttl| *ttl > 0).map(|ttl| ttl as u64))
}
