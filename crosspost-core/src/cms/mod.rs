mod error;

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CmsSection, Credentials};

pub use error::{PostError, PostResult};

const BODY_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Clone, Serialize)]
pub struct PostPayload {
    pub title: String,
    pub content: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostOutcome {
    Published { id: u64, link: String },
    /// 2xx status whose body was not the expected JSON document.
    AmbiguousSuccess { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: u64,
    link: String,
}

/// Creates posts through a WordPress-style REST endpoint.
#[derive(Debug, Clone)]
pub struct CmsPoster {
    client: Client,
    timeout: Duration,
}

impl CmsPoster {
    pub fn new(timeout: Duration) -> PostResult<Self> {
        let client = Client::builder()
            .user_agent("crosspost-cms/0.1")
            .timeout(timeout)
            .build()
            .map_err(|err| PostError::Network(err.to_string()))?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &CmsSection) -> PostResult<Self> {
        Self::new(Duration::from_secs(config.timeout_seconds))
    }

    pub async fn post(
        &self,
        endpoint: &str,
        credentials: &Credentials,
        payload: &PostPayload,
    ) -> PostResult<PostOutcome> {
        if endpoint.trim().is_empty() {
            return Err(PostError::Config("endpoint is empty".into()));
        }
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(PostError::Config("cms credentials are missing".into()));
        }

        info!(endpoint, title = %payload.title, status = %payload.status, "posting to cms");
        let response = self
            .client
            .post(endpoint)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .json(payload)
            .send()
            .await
            .map_err(|err| self.classify(err))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| self.classify(err))?;

        if !status.is_success() {
            return Err(PostError::HttpStatus {
                code: status.as_u16(),
                body: excerpt(&body),
            });
        }

        match serde_json::from_str::<CreatedPost>(&body) {
            Ok(created) => {
                info!(id = created.id, link = %created.link, "cms post created");
                Ok(PostOutcome::Published {
                    id: created.id,
                    link: created.link,
                })
            }
            Err(err) => {
                warn!(status = status.as_u16(), error = %err, "cms returned success without a post document");
                Ok(PostOutcome::AmbiguousSuccess {
                    status: status.as_u16(),
                    body: excerpt(&body),
                })
            }
        }
    }

    fn classify(&self, err: reqwest::Error) -> PostError {
        if err.is_timeout() {
            PostError::Timeout(self.timeout)
        } else {
            PostError::Network(err.to_string())
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let mut cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(BODY_EXCERPT_CHARS + 10);
        let cut = excerpt(&body);
        assert_eq!(cut.chars().count(), BODY_EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
        assert_eq!(excerpt("  short  "), "short");
    }

    #[test]
    fn payload_omits_missing_excerpt() {
        let payload = PostPayload {
            title: "Hello".into(),
            content: "<p>Hi</p>".into(),
            status: "draft".into(),
            excerpt: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("excerpt").is_none());
        assert_eq!(json["status"], "draft");
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let poster = CmsPoster::new(Duration::from_secs(1)).unwrap();
        let payload = PostPayload {
            title: "Hello".into(),
            content: "Hi".into(),
            status: "draft".into(),
            excerpt: None,
        };
        let err = poster
            .post("http://127.0.0.1:9/posts", &Credentials::default(), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, PostError::Config(_)));
    }
}
