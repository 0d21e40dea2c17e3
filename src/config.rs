use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_MODEL_PATH: &str =
    "models/trace_mlt-4modern_hw_rimes_lines-v3+synth-1034184_best_encoder.tar.onnx";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub backend_config: BackendConfig,
    pub model_config: ModelConfig,
    pub scheduler_config: SchedulerSettings,
}

/// Exam backend REST endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Bearer token used when a submitted task carries none of its own.
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: String,
    pub target_height: usize,
    pub pad_left: usize,
    pub pad_right: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub dispatch_throttle_ms: u64,
    pub pause_poll_ms: u64,
}

impl SchedulerSettings {
    pub fn dispatch_throttle(&self) -> Duration {
        Duration::from_millis(self.dispatch_throttle_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        // Backend configuration
        let base_url =
            env::var("BACKEND_BASE_URL").unwrap_or_else(|_| "http://localhost:9000".to_string());

        let auth_token = env::var("BACKEND_AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let request_timeout_secs = env::var("BACKEND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        // Model configuration
        let model_path =
            env::var("MODEL_PATH").unwrap_or_else(|_| DEFAULT_MODEL_PATH.to_string());

        let target_height = env::var("MODEL_TARGET_HEIGHT")
            .unwrap_or_else(|_| "128".to_string())
            .parse()
            .unwrap_or(128);

        let pad_left = env::var("MODEL_PAD_LEFT")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .unwrap_or(64);

        let pad_right = env::var("MODEL_PAD_RIGHT")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .unwrap_or(64);

        // Scheduler configuration
        let max_concurrent = env::var("SCHEDULER_MAX_CONCURRENT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        let dispatch_throttle_ms = env::var("SCHEDULER_THROTTLE_MS")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .unwrap_or(200);

        let pause_poll_ms = env::var("SCHEDULER_PAUSE_POLL_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        Ok(Config {
            api_host,
            api_port,
            backend_config: BackendConfig {
                base_url,
                auth_token,
                request_timeout_secs,
            },
            model_config: ModelConfig {
                model_path,
                target_height,
                pad_left,
                pad_right,
            },
            scheduler_config: SchedulerSettings {
                max_concurrent,
                dispatch_throttle_ms,
                pause_poll_ms,
            },
        })
    }
}
