//! Validated inference request model.
//!
//! Both transports deserialize inbound payloads into [`InferenceRequest`]
//! and call [`InferenceRequest::validate`] at the boundary; nothing
//! out-of-range ever reaches the orchestrator or the queue.

use serde::{Deserialize, Serialize};

use crate::engine::SamplingParams;
use crate::error::{Error, Result};

/// An inference request as accepted by both transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Prompt text to generate from.
    pub prompt: String,
    /// Maximum tokens to generate (1..=2048).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature (0.0..=2.0).
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Top-p (nucleus) sampling parameter (0.0..=1.0).
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Penalty for repeated tokens (1.0..=2.0, 1.0 means no penalty).
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    /// Optional list of stop sequences. An empty list behaves like none.
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    /// Optional session ID for conversation tracking.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_max_tokens() -> u32 {
    128
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.95
}
fn default_repeat_penalty() -> f32 {
    1.1
}

impl InferenceRequest {
    /// Range-check every field. Called before any queue interaction.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            return Err(Error::InvalidRequest("prompt must not be empty".to_string()));
        }
        if self.max_tokens == 0 || self.max_tokens > 2048 {
            return Err(Error::InvalidRequest(format!(
                "max_tokens must be in 1..=2048, got {}",
                self.max_tokens
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidRequest(format!(
                "temperature must be in 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidRequest(format!(
                "top_p must be in 0.0..=1.0, got {}",
                self.top_p
            )));
        }
        if !(1.0..=2.0).contains(&self.repeat_penalty) {
            return Err(Error::InvalidRequest(format!(
                "repeat_penalty must be in 1.0..=2.0, got {}",
                self.repeat_penalty
            )));
        }
        Ok(())
    }

    /// Sampling parameters passed through unmodified to the engine.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            repeat_penalty: self.repeat_penalty,
            stop: self.stop.clone().unwrap_or_default(),
        }
    }
}
