//! GitLab provider
//!
//! GitLab does not sign deliveries; it echoes the hook's secret token in the
//! `X-Gitlab-Token` header. Projects are addressed by their URL-encoded
//! `owner/name` path.

use async_trait::async_trait;
use axum::http::HeaderMap;
use kiln_core::domain::pipeline::PipelineStatus;
use kiln_core::domain::work::OAuthToken;
use reqwest::{Client, Url};
use serde::Deserialize;

use super::{
    CommitStatus, Provider, ProviderError, PushEvent, Result, WebhookEvent, check_response,
    endpoint, header_str, parse_base_url,
};

const HEADER_EVENT: &str = "x-gitlab-event";
const HEADER_TOKEN: &str = "x-gitlab-token";

#[derive(Debug, Clone)]
pub struct GitLabProvider {
    client: Client,
    /// `<instance>/api/v4`
    api_url: Url,
}

impl GitLabProvider {
    pub fn new(client: Client, instance_url: &str) -> Result<Self> {
        let instance = parse_base_url(instance_url)?;
        Ok(Self {
            client,
            api_url: endpoint(&instance, &["api", "v4"])?,
        })
    }

    fn project_endpoint(&self, owner: &str, repo: &str, rest: &[&str]) -> Result<Url> {
        let project = format!("{}/{}", owner, repo);
        let mut segments = vec!["projects", project.as_str()];
        segments.extend_from_slice(rest);
        endpoint(&self.api_url, &segments)
    }
}

/// Compares without short-circuiting on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    checkout_sha: Option<String>,
    project: ProjectPayload,
}

#[derive(Deserialize)]
struct ProjectPayload {
    id: i64,
    git_http_url: String,
}

#[derive(Deserialize)]
struct HookCreated {
    id: i64,
}

#[async_trait]
impl Provider for GitLabProvider {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn status_state(&self, status: PipelineStatus) -> &'static str {
        match status {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Error => "failed",
        }
    }

    fn verify_signature(&self, headers: &HeaderMap, _body: &[u8], secret: &str) -> bool {
        header_str(headers, HEADER_TOKEN)
            .is_some_and(|token| constant_time_eq(token.as_bytes(), secret.as_bytes()))
    }

    fn parse_event(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent> {
        let event = header_str(headers, HEADER_EVENT).ok_or_else(|| {
            ProviderError::InvalidPayload(format!("missing {} header", HEADER_EVENT))
        })?;

        if event != "Push Hook" {
            return Ok(WebhookEvent::Unsupported(event.to_string()));
        }

        let payload: PushPayload = serde_json::from_slice(body)
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        // Branch deletions carry no checkout SHA
        let Some(commit) = payload.checkout_sha else {
            return Ok(WebhookEvent::Ignored(format!(
                "{} was deleted",
                payload.git_ref
            )));
        };

        Ok(WebhookEvent::Push(PushEvent {
            provider_repo_id: payload.project.id,
            commit,
            clone_url: payload.project.git_http_url,
            git_ref: payload.git_ref,
        }))
    }

    async fn create_commit_status(&self, token: &OAuthToken, status: &CommitStatus) -> Result<()> {
        let url = self.project_endpoint(&status.owner, &status.repo, &["statuses", &status.commit])?;

        let body = serde_json::json!({
            "state": self.status_state(status.status),
            "target_url": status.target_url,
            "description": status.description,
            "name": status.context,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await?;
        check_response(response).await?;

        Ok(())
    }

    async fn create_webhook(
        &self,
        token: &OAuthToken,
        owner: &str,
        repo: &str,
        hook_url: &str,
        secret: &str,
    ) -> Result<i64> {
        let url = self.project_endpoint(owner, repo, &["hooks"])?;

        let body = serde_json::json!({
            "url": hook_url,
            "token": secret,
            "push_events": true,
            "enable_ssl_verification": true,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await?;
        let created: HookCreated = check_response(response).await?.json().await?;

        Ok(created.id)
    }

    async fn delete_webhook(
        &self,
        token: &OAuthToken,
        owner: &str,
        repo: &str,
        hook_id: i64,
    ) -> Result<()> {
        let hook_id = hook_id.to_string();
        let url = self.project_endpoint(owner, repo, &["hooks", &hook_id])?;

        let response = self
            .client
            .delete(url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        check_response(response).await?;

        Ok(())
    }
}
