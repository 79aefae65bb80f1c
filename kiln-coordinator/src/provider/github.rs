//! GitHub provider
//!
//! Deliveries are signed with HMAC-SHA256 in the `X-Hub-Signature-256`
//! header as `sha256=<hex>`. GitHub commit statuses know no "running" state,
//! so a running pipeline is published as `pending`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use kiln_core::domain::pipeline::PipelineStatus;
use kiln_core::domain::work::OAuthToken;
use reqwest::{Client, Url};
use serde::Deserialize;
use sha2::Sha256;

use super::{
    CommitStatus, Provider, ProviderError, PushEvent, Result, WebhookEvent, check_response,
    endpoint, header_str, parse_base_url,
};

type HmacSha256 = Hmac<Sha256>;

const HEADER_EVENT: &str = "x-github-event";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";
const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct GitHubProvider {
    client: Client,
    api_url: Url,
}

impl GitHubProvider {
    pub fn new(client: Client, api_url: &str) -> Result<Self> {
        Ok(Self {
            client,
            api_url: parse_base_url(api_url)?,
        })
    }

    fn request(&self, method: reqwest::Method, url: Url, token: &OAuthToken) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&token.access_token)
            .header("accept", "application/vnd.github+json")
    }
}

/// Verifies a `sha256=<hex>` signature header against the payload
fn verify_hmac(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = signature_header
        .strip_prefix("sha256=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Deserialize)]
struct RepositoryPayload {
    id: i64,
    clone_url: String,
}

#[derive(Deserialize)]
struct HookCreated {
    id: i64,
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn status_state(&self, status: PipelineStatus) -> &'static str {
        match status {
            PipelineStatus::Pending | PipelineStatus::Running => "pending",
            PipelineStatus::Success => "success",
            PipelineStatus::Error => "failure",
        }
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
        header_str(headers, HEADER_SIGNATURE)
            .is_some_and(|sig| verify_hmac(body, sig, secret.as_bytes()))
    }

    fn parse_event(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent> {
        let event = header_str(headers, HEADER_EVENT).ok_or_else(|| {
            ProviderError::InvalidPayload(format!("missing {} header", HEADER_EVENT))
        })?;

        match event {
            "ping" => Ok(WebhookEvent::Ping),
            "push" => {
                let payload: PushPayload = serde_json::from_slice(body)
                    .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

                if payload.deleted || payload.after == ZERO_SHA {
                    return Ok(WebhookEvent::Ignored(format!(
                        "{} was deleted",
                        payload.git_ref
                    )));
                }

                Ok(WebhookEvent::Push(PushEvent {
                    provider_repo_id: payload.repository.id,
                    commit: payload.after,
                    clone_url: payload.repository.clone_url,
                    git_ref: payload.git_ref,
                }))
            }
            other => Ok(WebhookEvent::Unsupported(other.to_string())),
        }
    }

    async fn create_commit_status(&self, token: &OAuthToken, status: &CommitStatus) -> Result<()> {
        let url = endpoint(
            &self.api_url,
            &["repos", &status.owner, &status.repo, "statuses", &status.commit],
        )?;

        let body = serde_json::json!({
            "state": self.status_state(status.status),
            "target_url": status.target_url,
            "description": status.description,
            "context": status.context,
        });

        let response = self
            .request(reqwest::Method::POST, url, token)
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
        let url = endpoint(&self.api_url, &["repos", owner, repo, "hooks"])?;

        let body = serde_json::json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": hook_url,
                "content_type": "json",
                "secret": secret,
            },
        });

        let response = self
            .request(reqwest::Method::POST, url, token)
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
        let url = endpoint(
            &self.api_url,
            &["repos", owner, repo, "hooks", &hook_id.to_string()],
        )?;

        let response = self.request(reqwest::Method::DELETE, url, token).send().await?;
        check_response(response).await?;

        Ok(())
    }
}

/// Signature header value GitHub would send for `payload`
#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
