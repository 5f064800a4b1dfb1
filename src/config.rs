//! Service configuration
//!
//! Every section has a `Default` matching the reference deployment; a JSON
//! file may override any subset of fields, and the binary applies CLI/env
//! overrides on top.

use crate::compute::earthengine::RetryPolicy;
use crate::core::pipeline::PipelineParams;
use crate::types::{FloodError, FloodResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// Directory receiving exported GeoPackages, served under `/output`
    pub output_dir: PathBuf,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
    /// Upper bound on one pipeline execution
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 80,
            allowed_origins: [
                "http://localhost",
                "http://localhost:8000",
                "http://localhost:8080",
                "http://127.0.0.1",
                "http://0.0.0.0",
                "http://0.0.0.0:80",
                "http://127.0.0.1:8000",
                "http://127.0.0.1:8080",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output_dir: PathBuf::from("output"),
            static_dir: PathBuf::from("static"),
            request_timeout_secs: 300,
        }
    }
}

/// Remote compute connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarthEngineConfig {
    pub base_url: String,
    /// Cloud project the requests are billed to
    pub project: String,
    /// Bearer token; falls back to the environment, then stored credentials
    pub access_token: Option<String>,
    /// Stored refresh-token credentials (defaults to ~/.config/earthengine/credentials)
    pub credentials_path: Option<PathBuf>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    /// Timeout of a single HTTP attempt
    pub http_timeout_secs: u64,
    /// Wall time one remote call may spend across all of its attempts
    pub call_budget_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for EarthEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://earthengine.googleapis.com".to_string(),
            project: String::new(),
            access_token: None,
            credentials_path: None,
            oauth_client_id: None,
            oauth_client_secret: None,
            http_timeout_secs: 60,
            call_budget_secs: 150,
            retry: RetryPolicy::default(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub server: ServerConfig,
    pub earthengine: EarthEngineConfig,
    pub pipeline: PipelineParams,
}

impl FloodConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn load_from_file(path: &Path) -> FloodResult<Self> {
        log::info!("Loading configuration from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
            FloodError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| FloodError::Config(format!("Invalid configuration {}: {}", path.display(), e)))
    }

    /// Keep a single remote call, retries included, inside the request timeout
    pub fn fit_remote_budget(mut self) -> Self {
        let limit = self.server.request_timeout_secs;
        if self.earthengine.call_budget_secs > limit {
            log::warn!(
                "Remote call budget {}s exceeds the request timeout, using {}s",
                self.earthengine.call_budget_secs,
                limit
            );
            self.earthengine.call_budget_secs = limit;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{"port": 8080}},
                "earthengine": {{"project": "flood-demo", "retry": {{"max_attempts": 5}}}},
                "pipeline": {{"refinement": {{"min_connected_pixels": 4}}}}
            }}"#
        )
        .unwrap();

        let config = FloodConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_secs, 300);
        assert_eq!(config.earthengine.project, "flood-demo");
        assert_eq!(config.earthengine.retry.max_attempts, 5);
        assert_eq!(config.earthengine.retry.initial_backoff_ms, 500);
        assert_eq!(config.pipeline.refinement.min_connected_pixels, 4);
        assert_eq!(config.pipeline.refinement.max_slope_degrees, 5.0);
    }

    #[test]
    fn test_remote_budget_fits_request_timeout() {
        let defaults = FloodConfig::default();
        assert!(defaults.earthengine.call_budget_secs <= defaults.server.request_timeout_secs);
        assert_eq!(defaults.clone().fit_remote_budget(), defaults);

        let mut config = FloodConfig::default();
        config.server.request_timeout_secs = 30;
        config.earthengine.call_budget_secs = 600;
        assert_eq!(config.fit_remote_budget().earthengine.call_budget_secs, 30);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            FloodConfig::load_from_file(file.path()),
            Err(FloodError::Config(_))
        ));
    }
}
