use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{SessionData, SessionStore};

/// Process-local session store keyed by `SHA-256(session id)`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionData>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id_hash: &[u8]) -> Result<Option<SessionData>> {
        Ok(self.sessions.lock().await.get(id_hash).cloned())
    }

    async fn save(&self, id_hash: Vec<u8>, data: SessionData) -> Result<()> {
        self.sessions.lock().await.insert(id_hash, data);
        Ok(())
    }

    async fn remove(&self, id_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(id_hash);
        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, data| data.created_at >= cutoff);
        Ok(before - sessions.len())
    }
}
