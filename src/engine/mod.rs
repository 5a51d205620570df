//! Generation engine abstraction layer.
//!
//! This module defines the `GenerationEngine` trait the orchestrator pulls
//! fragments from, and the initialization guard that owns the single engine
//! instance for the process.

mod llama_server;

pub use llama_server::{LlamaServerEngine, LlamaServerFactory};

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::Mutex;

use crate::error::Result;

/// Sampling parameters passed through to the engine unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    /// Stop sequences; empty means none.
    pub stop: Vec<String>,
}

/// A lazy, finite, non-restartable sequence of text fragments.
///
/// Items arrive in strict production order; an `Err` item means the engine
/// failed mid-sequence and no further fragments will follow.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Primary trait for generation engines.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Unique identifier for this engine type (e.g., "llama_server").
    fn engine_type(&self) -> &'static str;

    /// Begin a generation for the given prompt.
    ///
    /// The returned stream suspends the consumer at each pull until the next
    /// fragment is produced.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<FragmentStream>;
}

/// Builds the engine. The seam that lets tests substitute a mock and lets
/// the guard retry construction after a failure.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn GenerationEngine>>;
}

/// Single initialization guard for the process-wide engine.
///
/// The engine is constructed on first use and cached. A failed construction
/// (missing model artifact, server startup failure) leaves the slot empty so
/// the next request retries instead of poisoning the gateway.
pub struct EngineGuard {
    factory: Arc<dyn EngineFactory>,
    slot: Mutex<Option<Arc<dyn GenerationEngine>>>,
}

impl EngineGuard {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
        }
    }

    /// Get the engine, constructing it if this is the first use.
    pub async fn get(&self) -> Result<Arc<dyn GenerationEngine>> {
        let mut slot = self.slot.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(engine.clone());
        }
        let engine = self.factory.build().await?;
        *slot = Some(engine.clone());
        Ok(engine)
    }
}
