use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Users and repos are owned by the account side of the service; the
    // coordinator only reads them, but needs them to exist.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_users (
            id BIGSERIAL PRIMARY KEY,
            provider VARCHAR(50) NOT NULL,
            username VARCHAR(255) NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            token_type VARCHAR(50) NOT NULL DEFAULT 'bearer',
            token_expiry TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id BIGSERIAL PRIMARY KEY,
            provider VARCHAR(50) NOT NULL,
            provider_repo_id BIGINT NOT NULL,
            owner VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            service_user_id BIGINT NOT NULL REFERENCES service_users(id),
            UNIQUE (provider, provider_repo_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id BIGSERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repos(id),
            status VARCHAR(20) NOT NULL,
            commit_sha VARCHAR(64) NOT NULL,
            clone_url TEXT NOT NULL,
            target_url TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_logs (
            pipeline_id BIGINT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            ord INTEGER NOT NULL,
            cmd TEXT NOT NULL,
            output TEXT NOT NULL,
            exit_code INTEGER NOT NULL,
            PRIMARY KEY (pipeline_id, ord)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_repo_id ON pipelines(repo_id)")
        .execute(pool)
        .await?;

    kiln_queue::postgres::run_migrations(pool).await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
