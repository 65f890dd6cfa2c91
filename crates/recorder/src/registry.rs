use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use live_stream::{SessionPhase, StreamKind, StreamSession};

/// Progress of one active capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub key: String,
    pub kind: StreamKind,
    pub title: Option<String>,
    pub bytes_written: u64,
    pub size_threshold: u64,
    pub phase: SessionPhase,
}

/// Anchors currently being captured, keyed by capturing key.
///
/// Holding an entry is what keeps a second run from capturing the same anchor.
#[derive(Clone, Default)]
pub struct CapturingRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<StreamSession>>>>,
}

impl CapturingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is taken; returns the existing session on conflict
    pub async fn try_insert(
        &self,
        key: &str,
        session: Arc<StreamSession>,
    ) -> Result<(), Arc<StreamSession>> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(key) {
            return Err(existing.clone());
        }
        sessions.insert(key.to_string(), session);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.read().await.contains_key(key)
    }

    /// Remove whatever session is registered under the key
    pub async fn remove(&self, key: &str) -> Option<Arc<StreamSession>> {
        self.sessions.write().await.remove(key)
    }

    /// Remove the entry only if it still refers to `session`
    pub async fn remove_session(&self, key: &str, session: &Arc<StreamSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(existing) if Arc::ptr_eq(existing, session) => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of all active captures, sorted by key
    pub async fn progress(&self) -> Vec<CaptureProgress> {
        let sessions = self.sessions.read().await;
        let mut progress: Vec<_> = sessions
            .iter()
            .map(|(key, session)| CaptureProgress {
                key: key.clone(),
                kind: session.kind(),
                title: session.title(),
                bytes_written: session.bytes_written(),
                size_threshold: session.size_threshold(),
                phase: session.phase(),
            })
            .collect();
        progress.sort_by(|a, b| a.key.cmp(&b.key));
        progress
    }
}
