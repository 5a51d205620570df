//! llama-server generation engine.
//!
//! Spawns a llama-server subprocess for the configured GGUF model and
//! streams fragments from its `/completion` endpoint.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{EngineFactory, FragmentStream, GenerationEngine, SamplingParams};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

const HEALTH_CHECK_INTERVAL_MS: u64 = 200;
/// Bounded so fragment production suspends when the consumer lags.
const FRAGMENT_CHANNEL_CAPACITY: usize = 32;

/// Generation engine backed by a supervised llama-server process.
pub struct LlamaServerEngine {
    http_client: Client,
    base_url: String,
    /// Kept for its lifetime; kill_on_drop cleans the process up with the engine.
    _process: Option<Child>,
}

/// Request body for the llama-server /completion endpoint.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
    stop: &'a [String],
    stream: bool,
}

/// One streamed chunk from llama-server.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

impl LlamaServerEngine {
    /// Spawn a llama-server for the configured model and wait for it to
    /// come up. Fails with [`Error::ModelNotFound`] when the model file is
    /// missing; the server binary is never spawned in that case.
    pub async fn start(config: &EngineConfig) -> Result<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(Error::ModelNotFound(format!(
                "Model file not found at {}",
                config.model_path
            )));
        }

        let port = allocate_port().await?;

        let mut cmd = Command::new(&config.server_binary);
        cmd.arg("-m")
            .arg(model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("-c")
            .arg(config.context_size.to_string())
            .arg("-t")
            .arg(config.threads.to_string())
            .arg("-ngl")
            .arg(config.gpu_layers.to_string());
        if config.memory_lock {
            cmd.arg("--mlock");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let process = cmd.spawn().map_err(|e| {
            Error::Internal(format!(
                "Failed to spawn llama-server: {}. Binary: {}",
                e, config.server_binary
            ))
        })?;

        tracing::info!(
            "Spawned llama-server for {} on port {} (pid: {:?})",
            config.model_path,
            port,
            process.id()
        );

        let engine = Self {
            http_client: Client::new(),
            base_url: format!("http://127.0.0.1:{}", port),
            _process: Some(process),
        };
        engine.wait_for_ready(config.startup_timeout_secs).await?;

        Ok(engine)
    }

    /// Connect to an already-running llama-server without supervising a
    /// process of our own.
    pub fn connect(base_url: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            _process: None,
        }
    }

    /// Poll the health endpoint until the server is ready.
    async fn wait_for_ready(&self, timeout_secs: u64) -> Result<()> {
        let timeout = Duration::from_secs(timeout_secs);
        let start = Instant::now();
        let health_url = format!("{}/health", self.base_url);

        loop {
            if start.elapsed() > timeout {
                return Err(Error::Internal(format!(
                    "llama-server startup timeout after {:?}",
                    start.elapsed()
                )));
            }

            if let Ok(resp) = self.http_client.get(&health_url).send().await {
                if resp.status().is_success() {
                    tracing::info!("llama-server ready at {} ({:?})", self.base_url, start.elapsed());
                    return Ok(());
                }
            }

            tokio::time::sleep(Duration::from_millis(HEALTH_CHECK_INTERVAL_MS)).await;
        }
    }
}

/// Allocate an OS-assigned local port for the server.
async fn allocate_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind for port allocation: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("Failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

#[async_trait]
impl GenerationEngine for LlamaServerEngine {
    fn engine_type(&self) -> &'static str {
        "llama_server"
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<FragmentStream> {
        let body = CompletionRequest {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            repeat_penalty: params.repeat_penalty,
            stop: &params.stop,
            stream: true,
        };

        let url = format!("{}/completion", self.base_url);
        tracing::debug!("Sending completion request to llama-server: {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::InferenceFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InferenceFailed(format!("{}: {}", status, body)));
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        tokio::spawn(relay_fragments(response, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Read the streamed response body line by line and forward parsed fragments.
///
/// Stops silently when the receiver is dropped (the consumer abandoned the
/// generation); a transport or parse failure is forwarded as a final `Err`.
async fn relay_fragments(response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut bytes = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(Error::InferenceFailed(e.to_string()))).await;
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);

            let payload = match line.strip_prefix("data: ") {
                Some(payload) => payload,
                None => continue,
            };

            match serde_json::from_str::<CompletionChunk>(payload) {
                Ok(parsed) => {
                    if !parsed.content.is_empty() && tx.send(Ok(parsed.content)).await.is_err() {
                        return;
                    }
                    if parsed.stop {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(Error::InferenceFailed(format!(
                            "Malformed completion chunk: {}",
                            e
                        ))))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Builds a [`LlamaServerEngine`] from configuration.
pub struct LlamaServerFactory {
    config: EngineConfig,
}

impl LlamaServerFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineFactory for LlamaServerFactory {
    async fn build(&self) -> Result<Arc<dyn GenerationEngine>> {
        Ok(Arc::new(LlamaServerEngine::start(&self.config).await?))
    }
}
