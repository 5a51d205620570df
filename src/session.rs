//! Conversation memory: durable per-session turn history and prompt assembly.
//!
//! The store itself only needs a key-value backend with atomic get/set and
//! existence checks; [`SessionBackend`] is that seam. Values are JSON arrays
//! of `[role, text]` pairs under keys of the form `session:<id>`, so any
//! Redis-like store satisfies the contract. An in-process [`MemoryBackend`]
//! is provided.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One (role, text) entry in a conversation. Serializes as a two-element
/// JSON array, immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn(pub String, pub String);

impl Turn {
    pub fn role(&self) -> &str {
        &self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

/// Key-value storage seam for session data.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process backend. Sessions live for the lifetime of the gateway.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Session store: identifier allocation, append-only turn history and
/// prompt assembly on top of a [`SessionBackend`].
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    /// Per-session append locks. The backend read-modify-write on append is
    /// not atomic on its own, so appends to the same session are serialized
    /// here; sessions never contend with each other.
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return a valid session id, creating an empty conversation if the id
    /// is absent. A missing or empty id gets a freshly generated one.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> Result<String> {
        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let key = session_key(&id);
        if !self.backend.exists(&key).await? {
            self.backend.set(&key, "[]").await?;
        }
        Ok(id)
    }

    /// Append a new (role, text) turn to the conversation.
    pub async fn append(&self, session_id: &str, role: &str, text: &str) -> Result<()> {
        let lock = self.append_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_turn(session_id, role, text).await
        };
        drop(lock);
        self.release_append_lock(session_id).await;
        result
    }

    async fn append_turn(&self, session_id: &str, role: &str, text: &str) -> Result<()> {
        let key = session_key(session_id);
        let mut turns = self.load_turns(&key).await?;
        turns.push(Turn(role.to_string(), text.to_string()));
        let encoded = serde_json::to_string(&turns)
            .map_err(|e| Error::SessionStore(format!("failed to encode conversation: {}", e)))?;
        self.backend.set(&key, &encoded).await
    }

    /// Render the conversation into a flat prompt, one line per turn, ending
    /// with the bare `Assistant:` cue. An empty or missing conversation
    /// yields the cue alone.
    pub async fn build_prompt(&self, session_id: &str) -> Result<String> {
        let turns = self.load_turns(&session_key(session_id)).await?;

        let mut prompt = String::new();
        for turn in &turns {
            match turn.role() {
                "user" => prompt.push_str(&format!("User: {}\n", turn.text())),
                "assistant" => prompt.push_str(&format!("Assistant: {}\n", turn.text())),
                other => prompt.push_str(&format!("{}: {}\n", other, turn.text())),
            }
        }
        prompt.push_str("Assistant:");
        Ok(prompt)
    }

    /// Read the turns of a conversation in storage order.
    pub async fn turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.load_turns(&session_key(session_id)).await
    }

    async fn load_turns(&self, key: &str) -> Result<Vec<Turn>> {
        match self.backend.get(key).await? {
            Some(encoded) => serde_json::from_str(&encoded)
                .map_err(|e| Error::SessionStore(format!("corrupt conversation state: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn append_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a session's lock entry once the map holds the only reference;
    /// otherwise the map keeps one entry per session for the life of the
    /// process. A concurrent appender still holding the `Arc` keeps the
    /// entry alive, so contenders for one session always share a lock.
    async fn release_append_lock(&self, session_id: &str) {
        let mut locks = self.append_locks.lock().await;
        if let Some(entry) = locks.get(session_id) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(session_id);
            }
        }
    }

    #[cfg(test)]
    async fn append_lock_entries(&self) -> usize {
        self.append_locks.lock().await.len()
    }
}
