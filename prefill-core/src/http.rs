//! Shared HTTP client for the map and CRM services.
//!
//! Every call carries a bounded timeout. Throttling responses (429, and 403
//! which one provider uses for quota exhaustion) are retried after a fixed
//! floor plus random jitter, for a bounded number of attempts. Everything
//! else, timeouts included, fails immediately.

use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{PrefillError, Result};

/// Default timeout for one outbound request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum wait before retrying a throttled request.
pub const DEFAULT_THROTTLE_FLOOR: Duration = Duration::from_secs(10);

/// Upper bound of the random wait added to the floor.
pub const DEFAULT_THROTTLE_JITTER: Duration = Duration::from_secs(10);

/// Total attempts, the first included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Transport settings shared by all service clients.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    pub throttle_floor: Duration,
    pub throttle_jitter: Duration,
    /// Total attempts for a throttled request.
    pub max_attempts: u32,
    /// Refuse plain-HTTP endpoints.
    pub https_only: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: env_secs("HTTP_TIMEOUT_SECS", DEFAULT_TIMEOUT),
            throttle_floor: env_secs("THROTTLE_FLOOR_SECS", DEFAULT_THROTTLE_FLOOR),
            throttle_jitter: env_secs("THROTTLE_JITTER_SECS", DEFAULT_THROTTLE_JITTER),
            max_attempts: std::env::var("THROTTLE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            https_only: true,
        }
    }
}

/// Backoff schedule of `floor + uniform(0..=jitter)`, bounded by attempt count.
#[derive(Debug, Clone)]
pub struct ThrottleBackoff {
    floor: Duration,
    jitter: Duration,
    retries_left: u32,
    max_attempts: u32,
}

impl ThrottleBackoff {
    pub fn new(floor: Duration, jitter: Duration, max_attempts: u32) -> Self {
        Self {
            floor,
            jitter,
            retries_left: max_attempts.saturating_sub(1),
            max_attempts,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.throttle_floor, config.throttle_jitter, config.max_attempts)
    }
}

impl Backoff for ThrottleBackoff {
    fn reset(&mut self) {
        self.retries_left = self.max_attempts.saturating_sub(1);
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;

        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        Some(self.floor + Duration::from_millis(extra))
    }
}

/// Whether a status means "slow down and try again".
pub fn is_throttle_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN)
}

/// reqwest client plus retry policy, named after the service it talks to.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
    config: ServiceConfig,
    service: &'static str,
}

impl ServiceClient {
    #[instrument(level = "debug", skip_all, fields(
        service = service,
        timeout_ms = config.timeout.as_millis() as u64,
        max_attempts = config.max_attempts
    ))]
    pub fn new(service: &'static str, config: ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .https_only(config.https_only)
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to create HTTP client");
                PrefillError::Config(format!("Failed to create {service} HTTP client: {e}"))
            })?;

        debug!("Service client created");
        Ok(Self {
            client,
            config,
            service,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request built by `build`, retrying throttled responses, and
    /// decode the JSON body.
    pub async fn send_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(&build).await?;
        response.json::<T>().await.map_err(|e| {
            warn!(service = self.service, error = %e, "Failed to parse JSON response");
            PrefillError::Upstream(format!("Failed to parse {} response: {e}", self.service))
        })
    }

    /// Send a request built by `build`, retrying throttled responses.
    ///
    /// Returns the first 2xx response.
    pub async fn send<F>(&self, build: &F) -> Result<reqwest::Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        let result = retry_notify(
            ThrottleBackoff::from_config(&self.config),
            || {
                attempts += 1;
                let attempt = attempts;
                async move { self.send_once(build, attempt).await }
            },
            |err: PrefillError, wait: Duration| {
                warn!(
                    service = self.service,
                    error = %err,
                    retry_after_ms = wait.as_millis() as u64,
                    "Throttled, retry scheduled"
                );
            },
        )
        .await;

        let total_latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(service = self.service, total_latency_ms, "Request succeeded"),
            Err(e) => warn!(service = self.service, error = %e, total_latency_ms, "Request failed"),
        }
        result
    }

    async fn send_once<F>(
        &self,
        build: &F,
        attempt: u32,
    ) -> std::result::Result<reqwest::Response, backoff::Error<PrefillError>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let start = Instant::now();

        let response = build(&self.client).send().await.map_err(|e| {
            warn!(
                service = self.service,
                error = %e,
                timeout = e.is_timeout(),
                latency_ms = start.elapsed().as_millis() as u64,
                "Request failed"
            );
            backoff::Error::permanent(PrefillError::HttpError(e))
        })?;

        let status = response.status();
        debug!(service = self.service, status = %status, attempt, "Received HTTP response");

        if status.is_success() {
            return Ok(response);
        }

        if is_throttle_status(status) {
            Err(backoff::Error::transient(PrefillError::RateLimited {
                service: self.service.to_string(),
                status: status.as_u16(),
                attempts: attempt,
            }))
        } else {
            Err(backoff::Error::permanent(PrefillError::Upstream(format!(
                "{} returned status {status}",
                self.service
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Pong {
        ok: bool,
    }

    fn fast_config(max_attempts: u32) -> ServiceConfig {
        ServiceConfig {
            timeout: Duration::from_secs(2),
            throttle_floor: Duration::from_millis(5),
            throttle_jitter: Duration::from_millis(5),
            max_attempts,
            https_only: false,
        }
    }

    #[test]
    fn test_backoff_is_floor_plus_jitter() {
        let floor = Duration::from_secs(10);
        let jitter = Duration::from_secs(10);
        let mut backoff = ThrottleBackoff::new(floor, jitter, 50);
        for _ in 0..49 {
            let wait = backoff.next_backoff().unwrap();
            assert!(wait >= floor && wait <= floor + jitter, "{wait:?}");
        }
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn test_backoff_is_bounded_and_resets() {
        let mut backoff = ThrottleBackoff::new(Duration::ZERO, Duration::ZERO, 3);
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
        assert_eq!(backoff.next_backoff(), Some(Duration::ZERO));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert!(backoff.next_backoff().is_some());

        let mut single = ThrottleBackoff::new(Duration::ZERO, Duration::ZERO, 1);
        assert_eq!(single.next_backoff(), None);
    }

    #[test]
    fn test_throttle_statuses() {
        assert!(is_throttle_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_throttle_status(StatusCode::FORBIDDEN));
        assert!(!is_throttle_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_throttle_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_retries_throttled_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = ServiceClient::new("test", fast_config(5)).unwrap();
        let url = format!("{}/ping", server.uri());
        let pong: Pong = client.send_json(|c| c.get(&url)).await.unwrap();
        assert!(pong.ok);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = ServiceClient::new("test", fast_config(3)).unwrap();
        let url = server.uri();
        let err = client.send_json::<Pong, _>(|c| c.get(&url)).await.unwrap_err();
        assert!(matches!(
            err,
            PrefillError::RateLimited {
                status: 429,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ServiceClient::new("test", fast_config(5)).unwrap();
        let url = server.uri();
        let err = client.send_json::<Pong, _>(|c| c.get(&url)).await.unwrap_err();
        assert!(matches!(err, PrefillError::Upstream(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = ServiceConfig {
            timeout: Duration::from_millis(50),
            ..fast_config(5)
        };
        let client = ServiceClient::new("test", config).unwrap();
        let url = server.uri();
        let err = client.send_json::<Pong, _>(|c| c.get(&url)).await.unwrap_err();
        assert!(matches!(err, PrefillError::HttpError(ref e) if e.is_timeout()));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ServiceClient::new("test", fast_config(5)).unwrap();
        let url = server.uri();
        let err = client.send_json::<Pong, _>(|c| c.get(&url)).await.unwrap_err();
        assert!(matches!(err, PrefillError::Upstream(_)));
    }
}
