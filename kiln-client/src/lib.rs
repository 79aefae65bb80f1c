//! Kiln Reporter Client
//!
//! A small, type-safe HTTP client the runner uses to report pipeline
//! lifecycle events to the coordinator's RPC listener.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::CoordinatorClient;
//! use kiln_core::dto::report::PipelineStarted;
//!
//! # async fn example() -> kiln_client::Result<()> {
//! let client = CoordinatorClient::new("http://localhost:8081");
//!
//! client
//!     .pipeline_started(&PipelineStarted {
//!         pipeline_id: 42,
//!         started_at: chrono::Utc::now(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod reports;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// HTTP client for the coordinator's reporter calls
///
/// Every call is a unary POST answered with `204 No Content` or an error.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator RPC listener (e.g., "http://localhost:8081")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the RPC listener (e.g., "http://localhost:8081")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client whose calls give up after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new coordinator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and expect an empty acknowledgement
    async fn post_empty<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        self.handle_empty_response(response).await
    }

    /// Handle an API response that returns no content
    ///
    /// This method checks the status code and returns an error if the request failed.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
