//! Inference gateway: a concurrency-bounded streaming front-end for a local
//! llama.cpp model, with conversation memory and two transports (SSE and
//! WebSocket).

pub mod admission;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod session;
pub mod state;
pub mod test_util;

pub use admission::{AdmissionController, AdmissionStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use request::InferenceRequest;
pub use session::{MemoryBackend, SessionBackend, SessionStore, Turn};
pub use state::AppState;
