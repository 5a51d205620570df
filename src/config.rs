//! Configuration for the inference gateway.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Admission capacity bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of requests waiting for a concurrency slot.
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,
    /// Maximum number of generations in flight.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_max_size: default_queue_max_size(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

/// llama-server engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Path to the local GGUF model file.
    pub model_path: String,
    /// Path to the llama-server binary.
    #[serde(default = "default_server_binary")]
    pub server_binary: String,
    /// Context window size (-c flag).
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Number of CPU threads (-t flag).
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Number of layers to offload to GPU (-ngl flag). 0 = CPU only.
    #[serde(default)]
    pub gpu_layers: u32,
    /// Whether to mlock the model into RAM (--mlock flag).
    #[serde(default)]
    pub memory_lock: bool,
    /// Server startup timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_queue_max_size() -> usize {
    10
}
fn default_max_concurrent_requests() -> usize {
    2
}
fn default_server_binary() -> String {
    "llama-server".to_string()
}
fn default_context_size() -> u32 {
    2048
}
fn default_threads() -> u32 {
    8
}
fn default_startup_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_api_config() {
        let api = ApiConfig::default();
        assert_eq!(api.host, "0.0.0.0");
        assert_eq!(api.port, 8080);
    }

    #[test]
    fn test_default_limits() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.queue_max_size, 10);
        assert_eq!(limits.max_concurrent_requests, 2);
    }

    #[test]
    fn test_engine_config_defaults() {
        let engine: EngineConfig =
            serde_json::from_str(r#"{"model_path": "/models/llama-13b-q4_0.gguf"}"#).unwrap();
        assert_eq!(engine.server_binary, "llama-server");
        assert_eq!(engine.context_size, 2048);
        assert_eq!(engine.threads, 8);
        assert_eq!(engine.gpu_layers, 0);
        assert!(!engine.memory_lock);
    }
}
