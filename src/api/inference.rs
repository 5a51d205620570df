//! Chunked inference endpoint: one request, one SSE response stream.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::{Error, Result};
use crate::orchestrator::{self, FragmentSink, SinkClosed};
use crate::request::InferenceRequest;
use crate::state::AppState;

/// Build the inference router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/inference_sse", post(inference_sse))
}

/// Sink that frames orchestrator events as SSE data chunks.
struct SseSink {
    tx: mpsc::Sender<Event>,
}

/// SSE framing splits multi-line data on `\n` but a field value must never
/// contain `\r`, so carriage returns are normalized to plain newlines.
fn sse_data(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[async_trait]
impl FragmentSink for SseSink {
    async fn fragment(&mut self, text: &str) -> std::result::Result<(), SinkClosed> {
        self.tx
            .send(Event::default().data(sse_data(text)))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn complete(
        &mut self,
        _message: &str,
        _session_id: &str,
    ) -> std::result::Result<(), SinkClosed> {
        // Normal close: the stream simply ends after the last fragment.
        Ok(())
    }

    async fn error(&mut self, error: &Error) -> std::result::Result<(), SinkClosed> {
        self.tx
            .send(Event::default().data(sse_data(&format!("ERROR: {}", error))))
            .await
            .map_err(|_| SinkClosed)
    }
}

/// POST /v1/inference_sse - stream generated fragments as server-sent events.
///
/// Validation, session store and queue-full failures happen before any chunk
/// is sent and surface as real HTTP status codes. Failures after streaming
/// has started are delivered as a final in-band `ERROR:` chunk, since the
/// already-sent status cannot be changed.
async fn inference_sse(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InferenceRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let prepared = orchestrator::prepare(&state, &request).await?;

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut sink = SseSink { tx };
        orchestrator::stream_generation(state, prepared, &mut sink).await;
    });

    Ok(Sse::new(ReceiverStream::new(rx).map(Ok)))
}
