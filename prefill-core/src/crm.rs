//! Fire-and-forget feature-usage tags on the campaign CRM.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::error::{PrefillError, Result};
use crate::http::{ServiceClient, ServiceConfig};

/// Features a voter can be tagged as having used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    AbsenteeApplication,
    Registration,
    BallotStatus,
    EarlyVoting,
}

impl Feature {
    /// Stable tag name stored on the CRM person.
    pub fn tag(self) -> &'static str {
        match self {
            Self::AbsenteeApplication => "prefill-absentee-application",
            Self::Registration => "prefill-registration",
            Self::BallotStatus => "prefill-ballot-status",
            Self::EarlyVoting => "prefill-early-voting",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Configuration for [`CrmClient`].
#[derive(Clone)]
pub struct CrmConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub service: ServiceConfig,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            api_url: std::env::var("CRM_API_URL").ok().filter(|v| !v.is_empty()),
            api_key: std::env::var("CRM_API_KEY").ok().filter(|v| !v.is_empty()),
            service: ServiceConfig::default(),
        }
    }
}

impl fmt::Debug for CrmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("service", &self.service)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct TagRequest<'a> {
    voter_id: &'a str,
    tag: &'a str,
}

/// CRM tagging client.
#[derive(Debug, Clone)]
pub struct CrmClient {
    client: ServiceClient,
    api_url: String,
    api_key: String,
}

impl CrmClient {
    /// Build a client, or `None` when the CRM is not configured.
    pub fn from_config(config: CrmConfig) -> Result<Option<Self>> {
        match (config.api_url, config.api_key) {
            (Some(api_url), Some(api_key)) => Ok(Some(Self {
                client: ServiceClient::new("crm", config.service)?,
                api_url,
                api_key,
            })),
            (None, None) => Ok(None),
            _ => Err(PrefillError::Config(
                "CRM_API_URL and CRM_API_KEY must be set together".to_string(),
            )),
        }
    }

    /// Tag `voter_id` as having used `feature`.
    #[instrument(level = "debug", skip(self, voter_id), fields(tag = feature.tag()))]
    pub async fn tag(&self, voter_id: &str, feature: Feature) -> Result<()> {
        let body = TagRequest {
            voter_id,
            tag: feature.tag(),
        };
        self.client
            .send(&|c: &reqwest::Client| {
                c.post(&self.api_url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await?;
        debug!("Tagged voter in CRM");
        Ok(())
    }

    /// Tag in the background; failures are logged and otherwise ignored.
    pub fn notify_detached(
        self: &Arc<Self>,
        voter_id: impl Into<String>,
        feature: Feature,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        let voter_id = voter_id.into();
        tokio::spawn(async move {
            if let Err(e) = client.tag(&voter_id, feature).await {
                warn!(error = %e, tag = feature.tag(), "CRM tagging failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(server: &MockServer) -> CrmConfig {
        CrmConfig {
            api_url: Some(format!("{}/tags", server.uri())),
            api_key: Some("crm-key".to_string()),
            service: ServiceConfig {
                timeout: Duration::from_secs(2),
                throttle_floor: Duration::from_millis(1),
                throttle_jitter: Duration::ZERO,
                max_attempts: 2,
                https_only: false,
            },
        }
    }

    #[tokio::test]
    async fn test_tag_posts_json_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tags"))
            .and(header("authorization", "Bearer crm-key"))
            .and(body_json(serde_json::json!({
                "voter_id": "NY1",
                "tag": "prefill-early-voting"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = CrmClient::from_config(config(&server)).unwrap().unwrap();
        client.tag("NY1", Feature::EarlyVoting).await.unwrap();
    }

    #[tokio::test]
    async fn test_detached_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Arc::new(CrmClient::from_config(config(&server)).unwrap().unwrap());
        let handle = client.notify_detached("NY1", Feature::Registration);
        // The task completes without panicking even though the CRM failed
        handle.await.unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[test]
    fn test_unconfigured_is_none() {
        let config = CrmConfig {
            api_url: None,
            api_key: None,
            service: ServiceConfig::default(),
        };
        assert!(CrmClient::from_config(config).unwrap().is_none());
    }

    #[test]
    fn test_half_configured_is_error() {
        let config = CrmConfig {
            api_url: Some("https://crm.example".to_string()),
            api_key: None,
            service: ServiceConfig::default(),
        };
        assert!(matches!(
            CrmClient::from_config(config),
            Err(PrefillError::Config(_))
        ));
    }

    #[test]
    fn test_tags_are_distinct() {
        let tags = [
            Feature::AbsenteeApplication,
            Feature::Registration,
            Feature::BallotStatus,
            Feature::EarlyVoting,
        ]
        .map(Feature::tag);
        let unique: std::collections::HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), 4);
    }
}
