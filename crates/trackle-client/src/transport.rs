//! HTTP transport with the uniform retry/backoff policy.
//!
//! Policy, applied to every provider call:
//! - 429: sleep the integer Retry-After seconds when present, otherwise a
//!   fixed 2 s, plus up to 25% random jitter.
//! - 500/503 or a network-level failure (connect error, timeout): sleep
//!   `min(30, 2^attempt)` seconds plus jitter.
//! - Any other status: returned immediately, no retry.
//! - On a spent attempt budget the last observed reply is RETURNED, not
//!   raised, so callers can inspect exactly what failed.

use std::time::Duration;

use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::warn;

use crate::error::ClientError;

pub const API_BASE: &str = "https://api.17track.net/track/v2.2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP_SECS: u64 = 30;
const RATE_LIMIT_FALLBACK_SECS: u64 = 2;
const JITTER_FACTOR: f64 = 0.25;

/// The last observed HTTP status and decoded body of a call.
/// A non-JSON body is preserved as a JSON string so nothing is dropped.
#[derive(Clone, Debug)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug)]
pub struct Transport {
    client: reqwest::Client,
    base: String,
    token: SecretString,
    max_attempts: u32,
}

impl Transport {
    pub fn new(token: SecretString) -> Result<Self, ClientError> {
        Self::with_base(token, API_BASE.to_owned())
    }

    /// Base-URL override, used by tests against a local server.
    pub fn with_base(token: SecretString, base: String) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Network(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            token,
            max_attempts: MAX_ATTEMPTS,
        })
    }

    /// POST one provider operation, retrying per the policy above.
    pub async fn post(&self, endpoint: &str, body: Option<&Value>) -> Result<ApiReply, ClientError> {
        let url = format!("{}/{endpoint}", self.base);
        let mut last_reply: Option<ApiReply> = None;
        let mut last_network: Option<String> = None;

        for attempt in 0..self.max_attempts {
            let mut req = self
                .client
                .post(&url)
                .header("17token", self.token.expose_secret())
                .header("content-type", "application/json");
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let delay = match status {
                        429 => rate_limit_delay(resp.headers()),
                        500 | 503 => backoff_delay(attempt),
                        _ => return decode_reply(resp).await,
                    };

                    let reply = decode_reply(resp).await?;
                    if attempt + 1 == self.max_attempts {
                        return Ok(reply);
                    }
                    warn!(
                        endpoint,
                        status,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after provider error"
                    );
                    last_reply = Some(reply);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Connection errors and timeouts are retryable.
                    if attempt + 1 == self.max_attempts {
                        return match last_reply {
                            Some(reply) => Ok(reply),
                            None => Err(ClientError::Network(e.to_string())),
                        };
                    }
                    let delay = backoff_delay(attempt);
                    warn!(
                        endpoint,
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after network error"
                    );
                    last_network = Some(e.to_string());
                    tokio::time::sleep(delay).await;
                }
            }
        }

        match last_reply {
            Some(reply) => Ok(reply),
            None => Err(ClientError::Network(
                last_network.unwrap_or_else(|| "retry budget exhausted".into()),
            )),
        }
    }
}

async fn decode_reply(resp: reqwest::Response) -> Result<ApiReply, ClientError> {
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .await
        .map_err(|e| ClientError::Network(format!("reading response body: {e}")))?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(ApiReply { status, body })
}

/// 429 delay: integer Retry-After seconds when parseable, else 2 s; jittered.
fn rate_limit_delay(headers: &reqwest::header::HeaderMap) -> Duration {
    let secs = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(RATE_LIMIT_FALLBACK_SECS);
    with_jitter(Duration::from_secs(secs))
}

/// 5xx/network delay: exponential, capped at 30 s; jittered.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = BACKOFF_CAP_SECS.min(1u64 << attempt.min(63));
    with_jitter(Duration::from_secs(secs))
}

/// Add up to 25% random jitter.
fn with_jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen::<f64>() * JITTER_FACTOR;
    base + base.mul_f64(factor)
}
