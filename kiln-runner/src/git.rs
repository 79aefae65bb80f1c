//! Git Fetcher
//!
//! Materializes exactly one commit: an empty repository is initialised in
//! the checkout directory, the commit is fetched at depth 1 and checked out
//! detached. The work item's token authenticates HTTP(S) remotes through a
//! credential helper fed from the environment, so it never appears on a
//! command line, in logs or in error messages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiln_core::domain::work::OAuthToken;
use reqwest::Url;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Environment variable the credential helper reads the token from
const TOKEN_ENV: &str = "KILN_GIT_TOKEN";

/// Answers git's `get` requests with the token as HTTP basic credentials
const CREDENTIAL_HELPER: &str = r#"!f() { test "$1" = get && printf 'username=oauth2\npassword=%s\n' "$KILN_GIT_TOKEN"; }; f"#;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Checks out `commit` of `clone_url` into the empty directory `dest`
    async fn fetch(&self, clone_url: &str, commit: &str, token: &OAuthToken, dest: &Path)
    -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: String,
}

impl GitFetcher {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    async fn git(
        &self,
        dest: &Path,
        args: &[&str],
        credentials: &[(&str, String)],
        secret: &str,
    ) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(dest)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(credentials.iter().map(|(key, value)| (*key, value.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                redact(stderr.trim(), secret)
            );
        }

        Ok(())
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(
        &self,
        clone_url: &str,
        commit: &str,
        token: &OAuthToken,
        dest: &Path,
    ) -> Result<()> {
        let url = Url::parse(clone_url).context("Invalid clone URL")?;
        let secret = token.access_token.as_str();

        let credentials = if matches!(url.scheme(), "http" | "https") {
            credential_env(secret)
        } else {
            Vec::new()
        };

        debug!("Fetching {} at {}", clone_url, commit);

        self.git(dest, &["init", "--quiet"], &[], secret).await?;
        self.git(
            dest,
            &["fetch", "--quiet", "--depth", "1", "--no-tags", url.as_str(), commit],
            &credentials,
            secret,
        )
        .await?;
        self.git(dest, &["checkout", "--quiet", "--detach", commit], &[], secret)
            .await?;

        Ok(())
    }
}

/// Environment that installs the token credential helper for one git call
///
/// The first entry clears helpers from the user's or system's git config.
fn credential_env(access_token: &str) -> Vec<(&'static str, String)> {
    if access_token.is_empty() {
        return Vec::new();
    }

    vec![
        ("GIT_CONFIG_COUNT", "2".to_string()),
        ("GIT_CONFIG_KEY_0", "credential.helper".to_string()),
        ("GIT_CONFIG_VALUE_0", String::new()),
        ("GIT_CONFIG_KEY_1", "credential.helper".to_string()),
        ("GIT_CONFIG_VALUE_1", CREDENTIAL_HELPER.to_string()),
        (TOKEN_ENV, access_token.to_string()),
    ]
}

fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}
