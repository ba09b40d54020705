//! Pending OAuth authorization attempts, keyed by state token.
//!
//! An entry is created when the browser is opened and removed the first
//! time its state token is presented, whatever the outcome. Entries older
//! than the TTL are treated as absent.

use crate::types::ProviderKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use zeroize::Zeroizing;

/// One in-flight authorization attempt.
pub struct OAuthFlowState {
    pub state_token: String,
    pub code_verifier: Zeroizing<String>,
    pub provider: ProviderKind,
    pub created_at: Instant,
}

impl OAuthFlowState {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Expiring, single-use map of flow states.
pub struct FlowStateStore {
    ttl: Duration,
    states: Mutex<HashMap<String, OAuthFlowState>>,
}

impl FlowStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, state: OAuthFlowState) {
        let mut states = self.states.lock().await;
        states.retain(|_, s| !s.is_expired(self.ttl));
        states.insert(state.state_token.clone(), state);
    }

    /// Removes and returns the flow for `state_token` if it is still live.
    pub async fn consume(&self, state_token: &str) -> Option<OAuthFlowState> {
        let state = self.states.lock().await.remove(state_token)?;
        if state.is_expired(self.ttl) {
            return None;
        }
        Some(state)
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, s| !s.is_expired(self.ttl));
        before - states.len()
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(token: &str) -> OAuthFlowState {
        OAuthFlowState {
            state_token: token.to_string(),
            code_verifier: Zeroizing::new("verifier".to_string()),
            provider: ProviderKind::GoogleDrive,
            created_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consume_is_single_use() {
        let store = FlowStateStore::new(Duration::from_secs(600));
        store.insert(flow("GOOGLE_DRIVE:a")).await;

        assert!(store.consume("GOOGLE_DRIVE:a").await.is_some());
        assert!(store.consume("GOOGLE_DRIVE:a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_state_is_removed_and_rejected() {
        let store = FlowStateStore::new(Duration::from_secs(600));
        store.insert(flow("GOOGLE_DRIVE:b")).await;

        tokio::time::advance(Duration::from_secs(601)).await;

        assert!(store.consume("GOOGLE_DRIVE:b").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_keeps_live_entries() {
        let store = FlowStateStore::new(Duration::from_secs(60));
        store.insert(flow("old")).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        store.insert(flow("new")).await;

        // insert already pruned "old"
        assert_eq!(store.len().await, 1);
        assert_eq!(store.evict_expired().await, 0);
        assert!(store.consume("new").await.is_some());
    }
}
