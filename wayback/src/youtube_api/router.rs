//! Multi-credential request routing for the YouTube Data API.

use crate::credentials::{CredentialPool, mask_token};
use crate::youtube_api::error::RouterError;
use crate::youtube_api::search::ApiErrorResponse;
use eyre::Context;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Hard ceiling on attempts per logical request, however large the pool.
pub const MAX_ATTEMPTS_CAP: usize = 10;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// API root that endpoint names are appended to.
    pub base_url: String,
    /// Per-attempt deadline.
    pub request_timeout: Duration,
    /// Pause after an HTTP error or timeout before trying the next credential.
    pub http_backoff: Duration,
    /// Pause after a connection-level failure before trying the next credential.
    pub network_backoff: Duration,
    pub max_attempts_cap: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            http_backoff: Duration::from_millis(500),
            network_backoff: Duration::from_millis(1000),
            max_attempts_cap: MAX_ATTEMPTS_CAP,
        }
    }
}

/// Issues API calls on behalf of a whole [`CredentialPool`].
///
/// Each logical call is tried with the pool's current credential; on failure
/// the credential is marked bad, the pool rotates, and the call is retried
/// with the next usable credential, up to `min(pool size, max_attempts_cap)`
/// attempts. Callers only ever see the terminal outcome.
///
/// Clones share the same pool. Every attempt holds the pool lock from
/// credential selection through the health update, so concurrent callers never
/// interleave rotations; backoff sleeps happen with the lock released.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    pool: Arc<Mutex<CredentialPool>>,
    client: reqwest::Client,
    config: RouterConfig,
}

/// What a single attempt produced, before the pool reacts to it.
enum Attempt {
    Success(Value),
    Failed(RouterError),
}

impl RequestRouter {
    pub fn new(pool: Arc<Mutex<CredentialPool>>, config: RouterConfig) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            pool,
            client,
            config,
        })
    }

    pub fn pool(&self) -> &Arc<Mutex<CredentialPool>> {
        &self.pool
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Performs `GET <base_url>/<endpoint>?<params>&key=<credential>`.
    ///
    /// # Returns
    ///
    /// * `Ok(body)` - the first attempt that came back `200 OK` with a JSON body
    /// * `Err(RouterError::NoCredentialsAvailable)` - the pool is empty
    /// * `Err(RouterError::Http { .. } | Network | Timeout)` - an attempt failed
    ///   and no usable credential was left to rotate to
    /// * `Err(RouterError::AllCredentialsExhausted)` - the attempt budget ran out
    #[instrument(skip(self, params), level = tracing::Level::DEBUG)]
    pub async fn execute(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Value, RouterError> {
        let max_attempts = {
            let pool = self.pool.lock().await;
            if pool.is_empty() {
                tracing::error!("no credentials configured");
                return Err(RouterError::NoCredentialsAvailable);
            }
            pool.len().min(self.config.max_attempts_cap)
        };

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );

        for attempt in 0..max_attempts {
            let failure = {
                let mut pool = self.pool.lock().await;
                let Some(credential) = pool.current() else {
                    return Err(RouterError::NoCredentialsAvailable);
                };
                let token = credential.token.clone();
                tracing::trace!(attempt, credential = %mask_token(&token), "sending request");

                match self.attempt(&url, params, &token).await {
                    Attempt::Success(body) => {
                        pool.mark_success(&token);
                        tracing::trace!(attempt, "request succeeded");
                        return Ok(body);
                    }
                    Attempt::Failed(failure) => {
                        pool.mark_failed(&token, &failure.reason());
                        if !pool.rotate() {
                            tracing::error!(
                                attempt,
                                error = %failure,
                                "request failed and no usable credential remains"
                            );
                            return Err(failure);
                        }
                        failure
                    }
                }
            };

            if attempt + 1 < max_attempts {
                let delay = failure.backoff(self.config.http_backoff, self.config.network_backoff);
                tracing::debug!(attempt, ?delay, error = %failure, "retrying with next credential");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(max_attempts, "all credentials exhausted");
        Err(RouterError::AllCredentialsExhausted)
    }

    async fn attempt(&self, url: &str, params: &[(&str, String)], token: &str) -> Attempt {
        let response = match self
            .client
            .get(url)
            .query(params)
            .query(&[("key", token)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Attempt::Failed(RouterError::from_reqwest(e)),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Attempt::Failed(RouterError::from_reqwest(e)),
        };

        if status == StatusCode::OK {
            return match serde_json::from_slice(&body) {
                Ok(json) => Attempt::Success(json),
                Err(e) => {
                    tracing::debug!(error = %e, "response body is not JSON");
                    Attempt::Failed(RouterError::Http {
                        status: status.as_u16(),
                        message: "Invalid JSON response".to_string(),
                    })
                }
            };
        }

        let message = serde_json::from_slice::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
        Attempt::Failed(RouterError::Http {
            status: status.as_u16(),
            message,
        })
    }
}
