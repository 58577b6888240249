//! Global State Store
//!
//! Single authoritative `GlobalState`. Writers are serialized by one lock and
//! swap in a fresh `Arc` per merge, so a reader always holds a snapshot from
//! exactly one point in the merge order.
//!
//! Last write wins per field, by the order merges acquire the lock. There is
//! no per-field clock: two producers racing on the same field resolve by call
//! order, not by which value is fresher.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use super::state::{GlobalState, StatePatch};
use crate::config::StoreConfig;
use crate::listener::{spawn_listener, ListenerHandle};

/// Notification sent after every accepted mutation
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub version: u64,
    /// Fields written by the mutation
    pub touched: Vec<String>,
    pub state: Arc<GlobalState>,
}

/// Clonable handle to one store instance
#[derive(Clone)]
pub struct GlobalStore {
    state: Arc<RwLock<Arc<GlobalState>>>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl GlobalStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_state(config, GlobalState::new())
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    /// Create seeded with an initial state
    pub fn with_state(config: StoreConfig, initial: GlobalState) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            state: Arc::new(RwLock::new(Arc::new(initial))),
            event_tx,
        }
    }

    /// Current snapshot
    pub async fn get_state(&self) -> Arc<GlobalState> {
        self.state.read().await.clone()
    }

    /// Merge `patch` into the state and notify subscribers once.
    ///
    /// Returns the state version after the merge. An empty patch is accepted
    /// without a version bump or notification.
    pub async fn set_partial_state(&self, patch: StatePatch) -> u64 {
        self.update_with(|_| patch).await
    }

    /// Build a patch from the current state and merge it under the same lock,
    /// so read-modify-write updates such as counters never lose a concurrent
    /// merge.
    pub async fn update_with<F>(&self, build: F) -> u64
    where
        F: FnOnce(&GlobalState) -> StatePatch,
    {
        let mut current = self.state.write().await;
        let patch = build(&current);
        let touched = patch.touched_fields();
        if touched.is_empty() {
            return current.version;
        }

        let now = Utc::now();
        let mut next = GlobalState::clone(&current);
        patch.apply_to(&mut next, now);
        next.version += 1;
        next.updated_at = now;

        let version = next.version;
        *current = Arc::new(next);
        debug!("State v{} merged fields {:?}", version, touched);

        // Sent under the lock so notifications follow merge order
        self.notify(&current, touched);
        version
    }

    /// Enable trading. Returns false if it was already enabled.
    pub async fn start_trading(&self) -> bool {
        self.set_active(true).await
    }

    /// Disable trading. Returns false if it was already disabled.
    pub async fn stop_trading(&self) -> bool {
        self.set_active(false).await
    }

    pub async fn is_trading(&self) -> bool {
        self.state.read().await.is_active
    }

    async fn set_active(&self, active: bool) -> bool {
        let mut current = self.state.write().await;
        if current.is_active == active {
            debug!("Trading already {}", if active { "active" } else { "stopped" });
            return false;
        }

        let mut next = GlobalState::clone(&current);
        next.is_active = active;
        next.version += 1;
        next.updated_at = Utc::now();
        *current = Arc::new(next);

        info!(
            "Trading {} (state v{})",
            if active { "started" } else { "stopped" },
            current.version
        );
        self.notify(&current, vec!["is_active".to_string()]);
        true
    }

    fn notify(&self, state: &Arc<GlobalState>, touched: Vec<String>) {
        // No subscribers is fine; nothing is queued for late ones
        let _ = self.event_tx.send(StoreEvent {
            version: state.version,
            touched,
            state: state.clone(),
        });
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe a callback with the new snapshot after every mutation;
    /// each callback runs on its own task
    pub fn subscribe_fn<F>(&self, name: &str, mut listener: F) -> ListenerHandle
    where
        F: FnMut(Arc<GlobalState>) + Send + 'static,
    {
        spawn_listener(
            format!("store:{}", name),
            self.event_tx.subscribe(),
            move |event: StoreEvent| listener(event.state),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_update_with_sees_latest_state() {
        let store = GlobalStore::with_defaults();
        store
            .set_partial_state(StatePatch::new().open_positions(2))
            .await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .update_with(|s| StatePatch::new().open_positions(s.open_positions + 1))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let state = store.get_state().await;
        assert_eq!(state.open_positions, 12);
        assert_eq!(state.version, 11);
    }

    #[tokio::test]
    async fn test_disjoint_patches_both_land() {
        let store = GlobalStore::with_defaults();
        store
            .set_partial_state(StatePatch::new().volatility(0.3))
            .await;
        store
            .set_partial_state(StatePatch::new().balance_usd(dec!(250)))
            .await;

        let state = store.get_state().await;
        assert_eq!(state.volatility, 0.3);
        assert_eq!(state.balance_usd, dec!(250));
        assert_eq!(state.version, 2);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = GlobalStore::with_defaults();
        store.set_partial_state(StatePatch::new().sentiment(0.1)).await;
        store.set_partial_state(StatePatch::new().sentiment(-0.4)).await;
        assert_eq!(store.get_state().await.sentiment, -0.4);
    }

    #[tokio::test]
    async fn test_empty_patch_is_silent() {
        let store = GlobalStore::with_defaults();
        let mut rx = store.subscribe();

        let version = store.set_partial_state(StatePatch::new()).await;

        assert_eq!(version, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_stop_trading() {
        let store = GlobalStore::with_defaults();
        let mut rx = store.subscribe();

        assert!(store.start_trading().await);
        assert!(!store.start_trading().await);
        assert!(store.is_trading().await);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.touched, vec!["is_active".to_string()]);
        assert!(event.state.is_active);

        assert!(store.stop_trading().await);
        assert!(!store.is_trading().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_unaffected_by_later_merges() {
        let store = GlobalStore::with_defaults();
        store.set_partial_state(StatePatch::new().open_positions(1)).await;
        let before = store.get_state().await;

        store.set_partial_state(StatePatch::new().open_positions(2)).await;

        assert_eq!(before.open_positions, 1);
        assert_eq!(store.get_state().await.open_positions, 2);
    }
}
