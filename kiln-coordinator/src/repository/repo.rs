//! Repo Repository
//!
//! Read-only lookups of repos and the service users owning them. Those
//! tables are managed by the account side of the service.

use chrono::{DateTime, Utc};
use kiln_core::domain::work::OAuthToken;
use sqlx::PgPool;

use crate::storage::{CreationInfo, StateChangeInfo};

/// Resolve a repo by provider and the provider's repo identifier
pub async fn find_creation_info(
    pool: &PgPool,
    provider: &str,
    provider_repo_id: i64,
) -> Result<Option<CreationInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, CreationRow>(
        r#"
        SELECT r.id AS repo_id, r.owner, r.name AS repo_name, r.archived,
               u.access_token, u.refresh_token, u.token_type, u.token_expiry
        FROM repos r
        JOIN service_users u ON u.id = r.service_user_id
        WHERE r.provider = $1 AND r.provider_repo_id = $2
        "#,
    )
    .bind(provider)
    .bind(provider_repo_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| CreationInfo {
        repo_id: r.repo_id,
        owner: r.owner,
        repo_name: r.repo_name,
        archived: r.archived,
        token: r.token.into(),
    }))
}

/// Resolve the repo, owner and credential of an existing pipeline
pub async fn find_state_change_info(
    pool: &PgPool,
    pipeline_id: i64,
) -> Result<Option<StateChangeInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, StateChangeRow>(
        r#"
        SELECT p.commit_sha, p.target_url, r.provider, r.owner, r.name AS repo_name,
               u.access_token, u.refresh_token, u.token_type, u.token_expiry
        FROM pipelines p
        JOIN repos r ON r.id = p.repo_id
        JOIN service_users u ON u.id = r.service_user_id
        WHERE p.id = $1
        "#,
    )
    .bind(pipeline_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StateChangeInfo {
        commit: r.commit_sha,
        url: r.target_url,
        provider: r.provider,
        owner: r.owner,
        repo_name: r.repo_name,
        token: r.token.into(),
    }))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TokenColumns {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    token_expiry: Option<DateTime<Utc>>,
}

impl From<TokenColumns> for OAuthToken {
    fn from(cols: TokenColumns) -> Self {
        OAuthToken {
            access_token: cols.access_token,
            refresh_token: cols.refresh_token,
            token_type: cols.token_type,
            expiry: cols.token_expiry,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CreationRow {
    repo_id: i64,
    owner: String,
    repo_name: String,
    archived: bool,
    #[sqlx(flatten)]
    token: TokenColumns,
}

#[derive(sqlx::FromRow)]
struct StateChangeRow {
    commit_sha: String,
    target_url: String,
    provider: String,
    owner: String,
    repo_name: String,
    #[sqlx(flatten)]
    token: TokenColumns,
}
