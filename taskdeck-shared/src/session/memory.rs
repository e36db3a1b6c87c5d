/// In-process session store
///
/// Sessions vanish on restart and are not shared between processes. Expired
/// entries are dropped lazily on access and on every save.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionData, SessionStore, SessionStoreError};

#[derive(Debug, Clone)]
struct Entry {
    data: SessionData,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionStoreError> {
        let entries = self.entries.read().await;

        Ok(entries
            .get(session_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.data.clone()))
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            session_id.to_string(),
            Entry {
                data: data.clone(),
                expires_at: now + ttl,
            },
        );

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
