//! Rate-limited, retrying REST access to the spot/history price service.
//!
//! Every attempt passes through one shared [`RateGate`], so the spacing holds
//! across all callers holding the same gate, not per endpoint.

use crate::config::ConverterConfig;
use crate::error::AppError;
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Enforces a minimum spacing between the start of consecutive requests.
#[derive(Debug)]
pub struct RateGate {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until the spacing since the last issued call has elapsed, then
    /// records the call. Nothing is booked while waiting, so a caller that is
    /// dropped mid-wait leaves the gate untouched.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last_call = self.last_call.lock();
                let now = Instant::now();
                let wait = match *last_call {
                    Some(previous) => (previous + self.min_spacing).saturating_duration_since(now),
                    None => Duration::ZERO,
                };
                if wait.is_zero() {
                    *last_call = Some(now);
                    return;
                }
                wait
            };

            debug!(wait_ms = wait.as_millis() as u64, "rate gate delaying request");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-indexed), doubling each time.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    gate: Arc<RateGate>,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        gate: Arc<RateGate>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            gate,
            retry,
        }
    }

    pub fn from_config(http: Client, config: &ConverterConfig, gate: Arc<RateGate>) -> Self {
        Self::new(
            http,
            config.coingecko_base_url.clone(),
            gate,
            RetryPolicy {
                max_retries: config.max_retries,
                initial_delay: config.initial_retry_delay,
            },
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs `operation` behind the rate gate, retrying transient failures with
    /// exponential backoff. The last failure is returned as-is, already mapped
    /// into the crate error taxonomy.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut retry = 0_u32;
        loop {
            self.gate.acquire().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_for_retry(retry);
                    warn!(
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "price service call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(error) => {
                    error!(kind = ?error.kind(), %error, "price service call failed");
                    return Err(error);
                }
            }
        }
    }

    pub async fn get_json<T>(&self, endpoint: &str) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        self.call(|| async move {
            debug!(endpoint, "requesting price service");
            let response = self.http.get(endpoint).send().await?.error_for_status()?;
            let payload = response.json::<T>().await?;
            Ok(payload)
        })
        .await
    }
}

pub fn build_http_client(config: &ConverterConfig) -> Result<Client, AppError> {
    let client = Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    Ok(client)
}
