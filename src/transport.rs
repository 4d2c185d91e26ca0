//! Network transport
//!
//! The loader only needs `fetch(url) -> bytes`. `HttpTransport` implements it
//! over a blocking ureq agent on tokio's blocking pool, retrying transient
//! failures with a linear backoff.

use crate::config::schema::NetworkConfig;
use crate::error::{ShiploadError, ShiploadResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Capability to download the bytes at a URL
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> ShiploadResult<Vec<u8>>;
}

/// HTTP transport tuning
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Extra attempts after the first transient failure
    pub retries: u32,
    /// Delay before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,
    /// Largest response body accepted
    pub max_body_bytes: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for TransportOptions {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            retries: config.retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Transport over HTTP(S) using ureq
#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(options.timeout))
            .http_status_as_error(true)
            .build()
            .into();
        Self { agent, options }
    }

    fn get_blocking(agent: &ureq::Agent, url: &str, limit: u64) -> Result<Vec<u8>, ureq::Error> {
        let mut response = agent.get(url).call()?;
        response.body_mut().with_config().limit(limit).read_to_vec()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(TransportOptions::default())
    }
}

/// Whether a failed request is worth repeating
fn is_transient(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::StatusCode(code) => *code >= 500 || *code == 429,
        ureq::Error::Io(_) | ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed => true,
        _ => false,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> ShiploadResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            let agent = self.agent.clone();
            let target = url.to_string();
            let limit = self.options.max_body_bytes;
            let result =
                tokio::task::spawn_blocking(move || Self::get_blocking(&agent, &target, limit))
                    .await
                    .map_err(|e| ShiploadError::Internal(format!("transport task failed: {}", e)))?;

            match result {
                Ok(bytes) => {
                    debug!(url, size = bytes.len(), "downloaded");
                    return Ok(bytes);
                }
                Err(e) if is_transient(&e) && attempt < self.options.retries => {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "transient transport failure, retrying");
                    tokio::time::sleep(self.options.retry_backoff * attempt).await;
                }
                Err(e) => return Err(ShiploadError::transport(url, e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_network_config() {
        let config = NetworkConfig {
            timeout_secs: 7,
            retries: 4,
            retry_backoff_ms: 250,
            ..NetworkConfig::default()
        };
        let options = TransportOptions::from(&config);
        assert_eq!(options.timeout, Duration::from_secs(7));
        assert_eq!(options.retries, 4);
        assert_eq!(options.retry_backoff, Duration::from_millis(250));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(is_transient(&ureq::Error::StatusCode(503)));
        assert!(is_transient(&ureq::Error::StatusCode(429)));
        assert!(!is_transient(&ureq::Error::StatusCode(404)));
        assert!(!is_transient(&ureq::Error::HostNotFound));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let transport = HttpTransport::new(TransportOptions {
            timeout: Duration::from_secs(2),
            retries: 0,
            retry_backoff: Duration::from_millis(1),
            max_body_bytes: 1024,
        });
        let err = transport
            .fetch("http://127.0.0.1:9/manifest.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ShiploadError::Transport { .. }));
    }
}
