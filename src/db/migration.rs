use sqlx::SqlitePool;
use tracing::info;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");

    // Latest computed value per metric key; period is '' when unused
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS metric_values (
            subject TEXT NOT NULL,
            metric TEXT NOT NULL,
            period TEXT NOT NULL DEFAULT '',
            value TEXT NOT NULL,
            computed_at INTEGER NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (subject, metric, period)
        )",
    )
    .execute(pool)
    .await?;

    // Append-only audit of refresh attempts
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS refresh_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            metric_key TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            status TEXT NOT NULL,
            ttl_used INTEGER,
            error_message TEXT
        )",
    )
    .execute(pool)
    .await?;

    // Underlying source events (filings, trades, headlines) written by the ingestion side
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS source_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL,
            metric TEXT NOT NULL,
            occurred_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ttl_hints (
            subject TEXT NOT NULL,
            metric TEXT NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (subject, metric)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_events_key_time
         ON source_events(subject, metric, occurred_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_refresh_log_key
         ON refresh_log(metric_key, started_at)",
    )
    .execute(pool)
    .await?;

    info!("Database migrations completed successfully");
    Ok(())
}
