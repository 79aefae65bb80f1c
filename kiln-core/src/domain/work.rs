//! Work domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::pipeline::Pipeline;

/// The message carried by the work queue
///
/// Serialized as `{"pipeline": {...}, "token": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    pub pipeline: Pipeline,
    pub token: OAuthToken,
}

/// OAuth-style credential captured at enqueue time
///
/// A point-in-time copy: the runner never refreshes it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl OAuthToken {
    /// Creates a bearer token without refresh token or expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expiry: None,
        }
    }

    /// A token without expiry never expires
    pub fn is_expired_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

// Tokens end up in tracing output through `Work`'s Debug impl.
impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::PipelineStatus;
    use chrono::{Duration, Utc};

    fn sample_work() -> Work {
        Work {
            pipeline: Pipeline {
                id: 7,
                status: PipelineStatus::Pending,
                commit: "abc123".to_string(),
                clone_url: "https://github.com/acme/widget.git".to_string(),
                url: "https://ci.example.com/acme/widget/pipelines/7".to_string(),
                started_at: None,
                finished_at: None,
                repo_id: 3,
            },
            token: OAuthToken::bearer("s3cret"),
        }
    }

    #[test]
    fn test_work_envelope_shape() {
        let value = serde_json::to_value(sample_work()).unwrap();

        assert_eq!(value["pipeline"]["id"], 7);
        assert_eq!(value["pipeline"]["status"], "pending");
        assert_eq!(value["token"]["access_token"], "s3cret");
        assert!(value["token"].get("refresh_token").is_none());
    }

    #[test]
    fn test_token_type_defaults_when_absent() {
        let token: OAuthToken = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(token.token_type, "bearer");
        assert!(token.expiry.is_none());
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let mut token = OAuthToken::bearer("t");
        assert!(!token.is_expired_at(now));

        token.expiry = Some(now - Duration::minutes(1));
        assert!(token.is_expired_at(now));

        token.expiry = Some(now + Duration::minutes(1));
        assert!(!token.is_expired_at(now));
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", sample_work());
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
