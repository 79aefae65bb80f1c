//! Pipeline Log Repository
//!
//! Handles all database operations related to pipeline command logs.

use kiln_core::domain::log::PipelineLog;
use sqlx::PgPool;

/// Append one command log
///
/// A second entry with the same (pipeline, order) is ignored, which makes
/// reports from redelivered runs harmless.
pub async fn add_entry(pool: &PgPool, entry: &PipelineLog) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO pipeline_logs (pipeline_id, ord, cmd, output, exit_code)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (pipeline_id, ord) DO NOTHING
        "#,
    )
    .bind(entry.pipeline_id)
    .bind(entry.order)
    .bind(&entry.cmd)
    .bind(&entry.output)
    .bind(entry.exit_code)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find all logs of a pipeline ordered by execution order
pub async fn find_by_pipeline(
    pool: &PgPool,
    pipeline_id: i64,
) -> Result<Vec<PipelineLog>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT pipeline_id, ord, cmd, output, exit_code
        FROM pipeline_logs
        WHERE pipeline_id = $1
        ORDER BY ord ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

#[derive(sqlx::FromRow)]
struct LogRow {
    pipeline_id: i64,
    ord: i32,
    cmd: String,
    output: String,
    exit_code: i32,
}

impl From<LogRow> for PipelineLog {
    fn from(row: LogRow) -> Self {
        PipelineLog {
            pipeline_id: row.pipeline_id,
            order: row.ord,
            cmd: row.cmd,
            output: row.output,
            exit_code: row.exit_code,
        }
    }
}
