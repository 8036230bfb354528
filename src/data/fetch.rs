//! Remote dataset retrieval with bounded retries.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AppError;

const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Retry schedule for downloads: `attempts` tries, sleeping `wait_secs` after
/// the first failure and multiplying the wait by `wait_multiple` each time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait_secs: f64,
    pub wait_multiple: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            wait_secs: 3.0,
            wait_multiple: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1` (attempts are 1-based).
    pub fn wait_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.wait_secs * self.wait_multiple.powi(exp);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Download `url`, retrying according to `policy`.
///
/// Exhausting every attempt is an `IoError`; the caller is expected to abort.
pub fn fetch(url: &str, policy: &RetryPolicy) -> Result<Vec<u8>, AppError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::io(format!("Failed to build HTTP client: {e}")))?;

    let bytes = retry_with_backoff(policy, std::thread::sleep, |attempt| {
        info!(attempt, url, "Downloading");
        get_bytes(&client, url)
    })?;

    info!(bytes = bytes.len(), "Download successful");
    Ok(bytes)
}

fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>, AppError> {
    let resp = client
        .get(url)
        .send()
        .map_err(|e| AppError::io(format!("Request to {url} failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(AppError::io(format!(
            "Request to {url} failed with status {}.",
            resp.status()
        )));
    }

    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|e| AppError::io(format!("Failed to read response body from {url}: {e}")))
}

/// Run `op` up to `policy.attempts` times with exponential backoff.
///
/// `sleep` is injected so the schedule can be exercised without waiting.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut(u32) -> Result<T, AppError>,
) -> Result<T, AppError> {
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(attempt, error = %e, "Attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    sleep(policy.wait_after(attempt));
                }
            }
        }
    }

    let detail = last_err.map(|e| e.message().to_string()).unwrap_or_default();
    Err(AppError::io(format!(
        "All {attempts} download attempts failed: {detail}"
    )))
}
