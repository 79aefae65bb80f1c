//! Source-control providers
//!
//! One [`Provider`] implementation per hosting service. The coordinator builds
//! a [`ProviderRegistry`] once at startup and hands it to the services that
//! need to verify webhooks or publish commit statuses.

pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use axum::http::HeaderMap;
use kiln_core::domain::pipeline::PipelineStatus;
use kiln_core::domain::work::OAuthToken;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A webhook delivery normalised across providers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Verification event sent when a hook is registered
    Ping,
    Push(PushEvent),
    /// A supported event that carries nothing to build
    Ignored(String),
    /// An event type this service does not handle
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// The provider's numeric repo identifier
    pub provider_repo_id: i64,
    pub commit: String,
    pub clone_url: String,
    pub git_ref: String,
}

/// A commit status to publish
#[derive(Debug, Clone)]
pub struct CommitStatus {
    pub owner: String,
    pub repo: String,
    pub commit: String,
    pub status: PipelineStatus,
    pub target_url: String,
    pub context: String,
    pub description: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in webhook routes and stored on repos
    fn name(&self) -> &'static str;

    /// The provider's own state name for a pipeline status
    fn status_state(&self, status: PipelineStatus) -> &'static str;

    /// Checks the delivery against the shared webhook secret
    fn verify_signature(&self, headers: &HeaderMap, body: &[u8], secret: &str) -> bool;

    fn parse_event(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent>;

    async fn create_commit_status(&self, token: &OAuthToken, status: &CommitStatus) -> Result<()>;

    /// Registers a push hook; returns the provider's hook ID
    async fn create_webhook(
        &self,
        token: &OAuthToken,
        owner: &str,
        repo: &str,
        hook_url: &str,
        secret: &str,
    ) -> Result<i64>;

    async fn delete_webhook(
        &self,
        token: &OAuthToken,
        owner: &str,
        repo: &str,
        hook_id: i64,
    ) -> Result<()>;
}

/// Provider implementations by name
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every supported provider, sharing one HTTP client
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        let github = GitHubProvider::new(client.clone(), &config.github_api_url)?;
        let gitlab = GitLabProvider::new(client, &config.gitlab_url)?;

        Ok(Self::new().with_provider(github).with_provider(gitlab))
    }

    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.insert(provider.name(), Arc::new(provider));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.keys().copied()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parses an API base URL, which must be able to carry path segments
pub(crate) fn parse_base_url(base: &str) -> Result<Url> {
    let url = Url::parse(base).map_err(|e| ProviderError::InvalidUrl(format!("{}: {}", base, e)))?;

    if url.cannot_be_a_base() {
        return Err(ProviderError::InvalidUrl(base.to_string()));
    }

    Ok(url)
}

/// Appends path segments to `base`, percent-encoding each one
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ProviderError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turns a non-success response into [`ProviderError::Api`]
pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
