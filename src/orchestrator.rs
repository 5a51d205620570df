//! Generation orchestration: prompt assembly, admission, fragment relay and
//! history commit for one request.
//!
//! The orchestrator owns no persistent state of its own; it borrows slots
//! from the admission controller and session access from the store for the
//! duration of one request, and drives the transport entirely through
//! [`FragmentSink`] side effects.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::admission::QueueSlot;
use crate::engine::{GenerationEngine, SamplingParams};
use crate::error::{Error, Result};
use crate::request::InferenceRequest;
use crate::state::AppState;

/// The consumer side of a request went away (client disconnect).
#[derive(Debug)]
pub struct SinkClosed;

/// Transport-side sink for one request's events.
///
/// Implementations translate fragments, completion and errors into their
/// transport framing. A `SinkClosed` return tells the orchestrator the
/// client is gone and the generation can be abandoned.
#[async_trait]
pub trait FragmentSink: Send {
    async fn fragment(&mut self, text: &str) -> std::result::Result<(), SinkClosed>;
    async fn complete(
        &mut self,
        message: &str,
        session_id: &str,
    ) -> std::result::Result<(), SinkClosed>;
    async fn error(&mut self, error: &Error) -> std::result::Result<(), SinkClosed>;
}

/// A request that passed validation, had its user turn recorded, and holds
/// a reserved queue slot.
pub struct PreparedRequest {
    pub session_id: String,
    pub prompt: String,
    pub params: SamplingParams,
    engine: Arc<dyn GenerationEngine>,
    queue_slot: QueueSlot,
}

/// Validate the request, record the user turn, assemble the prompt, reserve
/// a queue slot and resolve the engine handle.
///
/// Everything here happens before any streaming starts, so transports can
/// surface these failures as real status codes (queue-full as 429, a missing
/// model artifact as 404). The user turn is retained even when a later step
/// fails. A failed engine construction drops the reserved queue slot and is
/// retried by the next request.
pub async fn prepare(state: &AppState, request: &InferenceRequest) -> Result<PreparedRequest> {
    request.validate()?;

    let session_id = state
        .sessions
        .get_or_create(request.session_id.as_deref())
        .await?;
    state
        .sessions
        .append(&session_id, "user", &request.prompt)
        .await?;
    let prompt = state.sessions.build_prompt(&session_id).await?;

    let queue_slot = state.admission.try_enqueue()?;
    let engine = state.engine.get().await.map_err(|e| {
        tracing::warn!("Engine unavailable for session {}: {}", session_id, e);
        e
    })?;

    Ok(PreparedRequest {
        session_id,
        prompt,
        params: request.sampling(),
        engine,
        queue_slot,
    })
}

/// Run an admitted request to completion, relaying fragments to the sink.
///
/// The concurrency slot acquired here is released on every exit path:
/// completion, engine failure, and client disconnect alike.
pub async fn stream_generation(
    state: Arc<AppState>,
    prepared: PreparedRequest,
    sink: &mut dyn FragmentSink,
) {
    let PreparedRequest {
        session_id,
        prompt,
        params,
        engine,
        queue_slot,
    } = prepared;

    let _slot = match state.admission.admit(queue_slot).await {
        Ok(slot) => slot,
        Err(e) => {
            let _ = sink.error(&e).await;
            return;
        }
    };

    let mut stream = match engine.generate_stream(&prompt, &params).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = sink.error(&e).await;
            return;
        }
    };

    let mut reply = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                reply.push_str(&fragment);
                if sink.fragment(&fragment).await.is_err() {
                    tracing::debug!("Client disconnected mid-stream, session {}", session_id);
                    return;
                }
            }
            Err(e) => {
                // Partial output already delivered stays delivered; no
                // assistant turn is recorded.
                tracing::warn!("Generation failed mid-stream, session {}: {}", session_id, e);
                let _ = sink.error(&e).await;
                return;
            }
        }
    }

    let final_reply = reply.trim_end().to_string();
    if let Err(e) = state
        .sessions
        .append(&session_id, "assistant", &final_reply)
        .await
    {
        let _ = sink.error(&e).await;
        return;
    }

    let _ = sink.complete(&final_reply, &session_id).await;
}

/// Handle one request entirely through sink side effects.
///
/// Used by the persistent transport, where validation and queue-full
/// failures are in-band error events rather than status codes.
pub async fn handle(state: Arc<AppState>, request: InferenceRequest, sink: &mut dyn FragmentSink) {
    let prepared = match prepare(&state, &request).await {
        Ok(prepared) => prepared,
        Err(e) => {
            let _ = sink.error(&e).await;
            return;
        }
    };
    stream_generation(state, prepared, sink).await;
}
