use super::expression::Expression;
use crate::config::EarthEngineConfig;
use crate::types::{Deadline, FloodError, FloodResult, TileReference};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding a ready-to-use OAuth access token
pub const ACCESS_TOKEN_ENV: &str = "EARTHENGINE_ACCESS_TOKEN";

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Bounded exponential backoff for idempotent remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds)
    pub initial_backoff_ms: u64,
    /// Upper bound of any single delay (milliseconds)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub fn run<T>(&self, what: &str, operation: impl FnMut() -> FloodResult<T>) -> FloodResult<T> {
        self.run_until(what, &Deadline::unbounded(), operation)
    }

    /// Like [`run`](Self::run), but no attempt starts and no backoff sleeps
    /// past `deadline`
    pub fn run_until<T>(
        &self,
        what: &str,
        deadline: &Deadline,
        mut operation: impl FnMut() -> FloodResult<T>,
    ) -> FloodResult<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            deadline.check()?;
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    if deadline.remaining().map_or(false, |left| left <= delay) {
                        log::warn!(
                            "{} attempt {} of {} failed ({}), no time left to retry",
                            what,
                            attempt,
                            max_attempts,
                            e
                        );
                        return Err(e);
                    }
                    log::warn!(
                        "{} attempt {} of {} failed ({}), retrying in {:?}",
                        what,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Stored credentials as written by the Earth Engine command line tools
#[derive(Debug, Deserialize)]
struct StoredCredentials {
    refresh_token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Default location of the stored credentials file
pub fn default_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("earthengine").join("credentials"))
}

/// Authenticated connection to the Earth Engine REST API
///
/// Created once at process start and shared by all requests.
pub struct EarthEngineSession {
    client: reqwest::blocking::Client,
    base_url: String,
    project: String,
    access_token: String,
    timeout: Duration,
    call_budget: Duration,
    retry: RetryPolicy,
}

impl EarthEngineSession {
    /// Resolve credentials and build the HTTP client
    pub fn initialize(config: &EarthEngineConfig) -> FloodResult<Self> {
        log::info!(
            "Initializing Earth Engine session for project '{}' at {}",
            config.project,
            config.base_url
        );
        if config.project.is_empty() {
            return Err(FloodError::Config(
                "Earth Engine project id is required".to_string(),
            ));
        }

        let timeout = Duration::from_secs(config.http_timeout_secs);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sarflood/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FloodError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let access_token = Self::resolve_access_token(&client, config)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            access_token,
            timeout,
            call_budget: Duration::from_secs(config.call_budget_secs),
            retry: config.retry.clone(),
        })
    }

    fn resolve_access_token(
        client: &reqwest::blocking::Client,
        config: &EarthEngineConfig,
    ) -> FloodResult<String> {
        if let Some(token) = config.access_token.as_ref().filter(|t| !t.is_empty()) {
            log::debug!("Using access token from configuration");
            return Ok(token.clone());
        }
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
            if !token.is_empty() {
                log::debug!("Using access token from {}", ACCESS_TOKEN_ENV);
                return Ok(token);
            }
        }

        let path = config
            .credentials_path
            .clone()
            .or_else(default_credentials_path)
            .ok_or_else(|| FloodError::Config("No credentials location available".to_string()))?;
        Self::exchange_refresh_token(client, &path, config)
    }

    fn exchange_refresh_token(
        client: &reqwest::blocking::Client,
        path: &Path,
        config: &EarthEngineConfig,
    ) -> FloodResult<String> {
        log::info!("Reading Earth Engine credentials from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            FloodError::Config(format!(
                "No access token set and credentials file {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        let stored: StoredCredentials = serde_json::from_str(&text)?;

        let client_id = stored
            .client_id
            .or_else(|| config.oauth_client_id.clone())
            .ok_or_else(|| FloodError::Config("OAuth client id is required for refresh tokens".to_string()))?;
        let client_secret = stored
            .client_secret
            .or_else(|| config.oauth_client_secret.clone())
            .ok_or_else(|| FloodError::Config("OAuth client secret is required for refresh tokens".to_string()))?;

        let response = client
            .post(OAUTH_TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", stored.refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .map_err(|e| FloodError::remote(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FloodError::Config(format!(
                "Token exchange rejected: HTTP {}",
                response.status().as_u16()
            )));
        }
        let token: TokenResponse = response
            .json()
            .map_err(|e| FloodError::remote(format!("Malformed token response: {}", e)))?;
        log::info!("Obtained Earth Engine access token");
        Ok(token.access_token)
    }

    fn project_url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.base_url, self.project, method)
    }

    /// Evaluate an expression and return its JSON value
    pub fn compute_value(&self, expression: &Expression) -> FloodResult<Value> {
        let url = self.project_url("value:compute");
        let body = json!({ "expression": expression });
        let deadline = Deadline::after(self.call_budget);
        let response = self
            .retry
            .run_until("value:compute", &deadline, || self.post_json(&url, &body, &deadline))?;
        response
            .get("result")
            .cloned()
            .ok_or_else(|| FloodError::remote("value:compute response has no result"))
    }

    /// Register a visualized image with the tile service
    pub fn create_map(&self, expression: &Expression) -> FloodResult<TileReference> {
        let url = self.project_url("maps");
        let body = json!({ "expression": expression, "fileFormat": "AUTO_JPEG_PNG" });
        let deadline = Deadline::after(self.call_budget);
        let response = self
            .retry
            .run_until("maps", &deadline, || self.post_json(&url, &body, &deadline))?;
        let name = response
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| FloodError::remote("maps response has no name"))?;
        Ok(TileReference(format!(
            "{}/v1/{}/tiles/{{z}}/{{x}}/{{y}}",
            self.base_url, name
        )))
    }

    fn post_json(&self, url: &str, body: &Value, deadline: &Deadline) -> FloodResult<Value> {
        log::debug!("POST {}", url);
        let timeout = deadline
            .remaining()
            .map_or(self.timeout, |left| left.min(self.timeout));
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .map_err(|e| self.classify_transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| self.classify_transport_error(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            let message = format!("HTTP {}: {}", status.as_u16(), message);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                FloodError::transient(message)
            } else {
                FloodError::remote(message)
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    fn classify_transport_error(&self, e: reqwest::Error) -> FloodError {
        if e.is_timeout() {
            FloodError::RemoteComputeTimeout(self.timeout)
        } else if e.is_connect() || e.is_request() {
            FloodError::transient(format!("HTTP request failed: {}", e))
        } else {
            FloodError::remote(format!("HTTP request failed: {}", e))
        }
    }

    /// End the session
    pub fn shutdown(self) {
        log::info!("Closing Earth Engine session for project '{}'", self.project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_only_transient_errors() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        };

        let calls = Cell::new(0);
        let result: FloodResult<u32> = policy.run("transient", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FloodError::transient("busy"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);

        let calls = Cell::new(0);
        let result: FloodResult<u32> = policy.run("permanent", || {
            calls.set(calls.get() + 1);
            Err(FloodError::remote("bad request"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);

        let calls = Cell::new(0);
        let result: FloodResult<u32> = policy.run("exhausted", || {
            calls.set(calls.get() + 1);
            Err(FloodError::transient("still busy"))
        });
        assert!(matches!(result, Err(FloodError::RemoteCompute { retryable: true, .. })));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_stops_at_deadline() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 10_000,
        };

        let calls = Cell::new(0);
        let expired = Deadline::after(Duration::ZERO);
        let result: FloodResult<u32> = policy.run_until("expired", &expired, || {
            calls.set(calls.get() + 1);
            Ok(1)
        });
        assert!(matches!(result, Err(FloodError::RemoteComputeTimeout(_))));
        assert_eq!(calls.get(), 0);

        // Backoff longer than the time left: fail after the first attempt
        let calls = Cell::new(0);
        let short = Deadline::after(Duration::from_secs(2));
        let started = std::time::Instant::now();
        let result: FloodResult<u32> = policy.run_until("short", &short, || {
            calls.set(calls.get() + 1);
            Err(FloodError::transient("busy"))
        });
        assert!(matches!(result, Err(FloodError::RemoteCompute { retryable: true, .. })));
        assert_eq!(calls.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
