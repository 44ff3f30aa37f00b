//! JSON-over-HTTP calls shared by the embedding and completion adapters.
//!
//! Every call has a hard per-request deadline (set on the `reqwest`
//! client). Transient failures are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Connection errors → retry
//! - Timeouts → fail immediately, so a slow backend costs one deadline
//! - Backoff: 1s, 2s, 4s, … (capped at 2^5)

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// A `reqwest` client bound to one deadline and retry budget.
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl JsonClient {
    pub fn new(timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` to `url` and return the decoded JSON response.
    pub async fn post(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(url, attempt, ?delay, "retrying backend request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(key) = bearer {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return Ok(json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("{} returned {}: {}", url, status, body_text));
                        continue;
                    }

                    bail!("{} returned {}: {}", url, status, body_text);
                }
                Err(e) if e.is_timeout() => {
                    bail!("{} timed out after {:?}", url, self.timeout);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", url)))
    }
}

/// Join a base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
