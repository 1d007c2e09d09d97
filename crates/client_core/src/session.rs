use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::protocol::Tokens;
use thiserror::Error;
use tracing::warn;

pub const SESSION_TOKENS_KEY: &str = "realmTokens";

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("failed to access session file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("failed to encode session value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: Arc<serde_json::Error>,
    },
}

/// Session-scoped key/value storage holding JSON documents.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Missing or unreadable entries read as `None`.
    async fn get_json(&self, key: &str) -> Option<Value>;
    async fn set_json(&self, key: &str, value: Value) -> Result<(), SessionError>;
}

pub async fn load_tokens(store: &dyn SessionStore) -> Option<Tokens> {
    let value = store.get_json(SESSION_TOKENS_KEY).await?;
    match serde_json::from_value(value) {
        Ok(tokens) => Some(tokens),
        Err(err) => {
            warn!(error = %err, "session: ignoring malformed stored tokens");
            None
        }
    }
}

pub async fn save_tokens(store: &dyn SessionStore, tokens: &Tokens) -> Result<(), SessionError> {
    let value = serde_json::to_value(tokens).map_err(|err| SessionError::Encode {
        key: SESSION_TOKENS_KEY.to_string(),
        source: Arc::new(err),
    })?;
    store.set_json(SESSION_TOKENS_KEY, value).await
}

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_json(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// All keys live in one JSON object file.
pub struct FileSessionStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Map<String, Value> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Map::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "session: failed to read session file");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(entries)) => entries,
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "session: session file is not a JSON object");
                Map::new()
            }
        }
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source: Arc::new(source),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_json(&self, key: &str) -> Option<Value> {
        self.read_entries().await.remove(key)
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await;
        entries.insert(key.to_string(), value);

        let encoded =
            serde_json::to_vec_pretty(&Value::Object(entries)).map_err(|err| SessionError::Encode {
                key: key.to_string(),
                source: Arc::new(err),
            })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.io_error(err))?;
        }
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|err| self.io_error(err))
    }
}
