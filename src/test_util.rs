//! Test helpers: a scripted generation engine and a recording fragment sink.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;

use crate::engine::{EngineFactory, FragmentStream, GenerationEngine, SamplingParams};
use crate::error::{Error, Result};
use crate::orchestrator::{FragmentSink, SinkClosed};

/// Engine that replays a scripted sequence of fragments, optionally ending
/// in a mid-sequence failure. Records every prompt it is invoked with.
pub struct ScriptedEngine {
    fragments: Vec<String>,
    failure: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    /// An engine that yields the given fragments and completes normally.
    pub fn completing(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            failure: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An engine that yields the given fragments, then fails.
    pub fn failing_after(fragments: &[&str], error: &str) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            failure: Some(error.to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the prompts this engine has been invoked with.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn engine_type(&self) -> &'static str {
        "scripted"
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _params: &SamplingParams,
    ) -> Result<FragmentStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let mut items: Vec<Result<String>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.failure {
            items.push(Err(Error::InferenceFailed(message.clone())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Factory that hands out a pre-built engine.
pub struct FixedFactory {
    engine: Arc<dyn GenerationEngine>,
}

impl FixedFactory {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EngineFactory for FixedFactory {
    async fn build(&self) -> Result<Arc<dyn GenerationEngine>> {
        Ok(self.engine.clone())
    }
}

/// Factory whose construction always fails with a missing model artifact.
pub struct FailingFactory {
    model_path: String,
}

impl FailingFactory {
    pub fn new(model_path: &str) -> Self {
        Self {
            model_path: model_path.to_string(),
        }
    }
}

#[async_trait]
impl EngineFactory for FailingFactory {
    async fn build(&self) -> Result<Arc<dyn GenerationEngine>> {
        Err(Error::ModelNotFound(format!(
            "Model file not found at {}",
            self.model_path
        )))
    }
}

/// One recorded sink event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Fragment(String),
    Complete { message: String, session_id: String },
    Error(String),
}

/// Sink that records every event it receives. Can be configured to behave
/// like a disconnected client after a number of events.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
    close_after: Option<usize>,
}

impl RecordingSink {
    /// A sink that reports `SinkClosed` once it has accepted `n` events.
    pub fn closing_after(n: usize) -> Self {
        Self {
            events: Vec::new(),
            close_after: Some(n),
        }
    }

    fn accept(&mut self, event: SinkEvent) -> std::result::Result<(), SinkClosed> {
        if let Some(limit) = self.close_after {
            if self.events.len() >= limit {
                return Err(SinkClosed);
            }
        }
        self.events.push(event);
        Ok(())
    }
}

#[async_trait]
impl FragmentSink for RecordingSink {
    async fn fragment(&mut self, text: &str) -> std::result::Result<(), SinkClosed> {
        self.accept(SinkEvent::Fragment(text.to_string()))
    }

    async fn complete(
        &mut self,
        message: &str,
        session_id: &str,
    ) -> std::result::Result<(), SinkClosed> {
        self.accept(SinkEvent::Complete {
            message: message.to_string(),
            session_id: session_id.to_string(),
        })
    }

    async fn error(&mut self, error: &Error) -> std::result::Result<(), SinkClosed> {
        self.accept(SinkEvent::Error(error.to_string()))
    }
}
