//! Hive-Mind Coordination Bus
//!
//! Tracks subsystem liveness from heartbeats, derives the weighted coherence
//! aggregate and fans out state snapshots and messages to subscribers.
//!
//! All mutations (register, unregister, heartbeat, sweep) go through one
//! write lock per bus. Delivery is at-most-once: messages published while
//! nobody is subscribed are dropped, lagging subscribers lose old events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::{HiveEvent, HiveMessage};
use super::state::{clamp_coherence, HiveState, LivenessStatus, SubsystemEntry};
use crate::config::HiveConfig;
use crate::coordination::ShutdownToken;
use crate::error::HiveError;
use crate::listener::{spawn_listener, ListenerHandle};

/// Counters exposed for telemetry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub heartbeats_accepted: u64,
    pub heartbeats_rejected: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    heartbeats_accepted: AtomicU64,
    heartbeats_rejected: AtomicU64,
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct BusInner {
    entries: BTreeMap<String, SubsystemEntry>,
    next_seq: u64,
}

/// A liveness transition applied by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessTransition {
    pub id: String,
    pub from: LivenessStatus,
    pub to: LivenessStatus,
}

/// Clonable handle to one bus instance
#[derive(Clone)]
pub struct HiveBus {
    config: Arc<HiveConfig>,
    inner: Arc<RwLock<BusInner>>,
    event_tx: broadcast::Sender<HiveEvent>,
    counters: Arc<BusCounters>,
}

impl HiveBus {
    /// Create a new bus
    pub fn new(config: HiveConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(BusInner::default())),
            event_tx,
            counters: Arc::new(BusCounters::default()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HiveConfig::default())
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    /// Register a subsystem with the configured default weight
    pub async fn register(&self, id: &str) {
        self.register_with_weight(id, self.config.default_weight)
            .await;
    }

    /// Register a subsystem with an explicit weight.
    ///
    /// Registering a known id re-arms its liveness and keeps its last coherence.
    pub async fn register_with_weight(&self, id: &str, weight: f64) {
        let weight = if !weight.is_finite() || weight < 0.0 {
            warn!(
                "Subsystem {} registered with invalid weight {}, using default",
                id, weight
            );
            self.config.default_weight
        } else if weight > self.config.max_weight {
            warn!(
                "Subsystem {} weight {} above max {}, capped",
                id, weight, self.config.max_weight
            );
            self.config.max_weight
        } else {
            weight
        };

        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;

        match inner.entries.get_mut(id) {
            Some(entry) => {
                entry.status = LivenessStatus::Active;
                entry.last_heartbeat = now;
                entry.base_weight = weight;
                entry.weight = weight;
                debug!("Subsystem {} re-registered, liveness re-armed", id);
            }
            None => {
                inner
                    .entries
                    .insert(id.to_string(), SubsystemEntry::new(id, weight, now, seq));
                inner.next_seq += 1;
                info!("Registered subsystem {} (weight {})", id, weight);
            }
        }

        self.publish_state(&inner.entries, now);
    }

    /// Remove a subsystem. Unknown ids are logged and ignored.
    pub async fn unregister(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if inner.entries.remove(id).is_none() {
            warn!("{}; unregister ignored", HiveError::UnknownSubsystem(id.to_string()));
            return;
        }
        info!("Unregistered subsystem {}", id);
        self.publish_state(&inner.entries, Utc::now());
    }

    /// Record a heartbeat carrying the subsystem's current coherence
    pub async fn heartbeat(&self, id: &str, coherence: f64) {
        self.heartbeat_at(id, coherence, Utc::now()).await;
    }

    /// Record a heartbeat observed at `at`.
    ///
    /// Unknown ids are a logged no-op. A stale or offline subsystem that
    /// heartbeats again becomes active at its base weight.
    pub async fn heartbeat_at(&self, id: &str, coherence: f64, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.entries.get_mut(id) else {
            self.counters
                .heartbeats_rejected
                .fetch_add(1, Ordering::Relaxed);
            warn!("{}; heartbeat ignored", HiveError::UnknownSubsystem(id.to_string()));
            return;
        };

        entry.coherence = clamp_coherence(coherence);
        entry.last_heartbeat = at;
        if entry.status != LivenessStatus::Active {
            info!("Subsystem {} recovered from {} state", id, entry.status);
            entry.status = LivenessStatus::Active;
            entry.weight = entry.base_weight;
        }
        self.counters
            .heartbeats_accepted
            .fetch_add(1, Ordering::Relaxed);

        self.publish_state(&inner.entries, at);
    }

    /// Apply liveness decay against the current clock
    pub async fn sweep(&self) -> Vec<LivenessTransition> {
        self.sweep_at(Utc::now()).await
    }

    /// Apply liveness decay as of `now`.
    ///
    /// active -> stale past `stale_after_secs` (weight scaled by
    /// `stale_weight_factor`), stale -> offline past `offline_after_secs`
    /// (weight 0). Sweeps never revive an entry; only heartbeats do.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Vec<LivenessTransition> {
        let mut inner = self.inner.write().await;
        let transitions = self.apply_sweep(&mut inner.entries, now);
        if !transitions.is_empty() {
            self.publish_state(&inner.entries, now);
        }
        transitions
    }

    fn apply_sweep(
        &self,
        entries: &mut BTreeMap<String, SubsystemEntry>,
        now: DateTime<Utc>,
    ) -> Vec<LivenessTransition> {
        let stale_after = self.config.stale_after();
        let offline_after = self.config.offline_after();
        let mut transitions = Vec::new();

        for entry in entries.values_mut() {
            let age = now.signed_duration_since(entry.last_heartbeat);
            let target = if age > offline_after {
                LivenessStatus::Offline
            } else if age > stale_after {
                LivenessStatus::Stale
            } else {
                continue;
            };

            let from = entry.status;
            let advances = matches!(
                (from, target),
                (LivenessStatus::Active, LivenessStatus::Stale)
                    | (LivenessStatus::Active, LivenessStatus::Offline)
                    | (LivenessStatus::Stale, LivenessStatus::Offline)
            );
            if !advances {
                continue;
            }

            entry.status = target;
            entry.weight = match target {
                LivenessStatus::Stale => entry.base_weight * self.config.stale_weight_factor,
                _ => 0.0,
            };

            warn!(
                "Subsystem {} is {} (last heartbeat: {})",
                entry.id, target, entry.last_heartbeat
            );
            let _ = self.event_tx.send(HiveEvent::LivenessChanged {
                id: entry.id.clone(),
                from,
                to: target,
            });
            transitions.push(LivenessTransition {
                id: entry.id.clone(),
                from,
                to: target,
            });
        }

        transitions
    }

    /// Current state, swept lazily so a silent subsystem never holds a
    /// last-known weight past its threshold
    pub async fn snapshot(&self) -> HiveState {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        if !self.apply_sweep(&mut inner.entries, now).is_empty() {
            self.publish_state(&inner.entries, now);
        }
        HiveState::from_entries(&inner.entries, now)
    }

    /// Current aggregate coherence
    pub async fn coherence(&self) -> f64 {
        self.snapshot().await.hive_mind_coherence
    }

    /// Number of registered subsystems, regardless of liveness
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Subscribe to bus events
    pub fn subscribe(&self) -> broadcast::Receiver<HiveEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe a callback; each callback runs on its own task
    pub fn subscribe_fn<F>(&self, name: &str, callback: F) -> ListenerHandle
    where
        F: FnMut(HiveEvent) + Send + 'static,
    {
        spawn_listener(format!("hive:{}", name), self.event_tx.subscribe(), callback)
    }

    /// Best-effort broadcast to every current subscriber
    pub fn broadcast(&self, from: &str, topic: &str, payload: serde_json::Value) {
        self.publish_message(HiveMessage::broadcast(from, topic, payload));
    }

    /// Ask another subsystem for help. A hint only: no acknowledgement, no
    /// guarantee anybody handles it, never blocks the caller.
    pub fn request_assistance(&self, from: &str, to: &str, reason: &str) {
        debug!("Subsystem {} requests assistance from {}: {}", from, to, reason);
        self.publish_message(HiveMessage::assistance(from, to, reason));
    }

    fn publish_message(&self, message: HiveMessage) {
        match self.event_tx.send(HiveEvent::Message(message)) {
            Ok(receivers) => {
                self.counters
                    .messages_published
                    .fetch_add(1, Ordering::Relaxed);
                debug!("Message delivered to {} subscribers", receivers);
            }
            Err(broadcast::error::SendError(event)) => {
                self.counters
                    .messages_dropped
                    .fetch_add(1, Ordering::Relaxed);
                if let HiveEvent::Message(msg) = event {
                    debug!("No subscribers, dropped message {} from {}", msg.topic, msg.from);
                }
            }
        }
    }

    fn publish_state(&self, entries: &BTreeMap<String, SubsystemEntry>, now: DateTime<Utc>) {
        if self.event_tx.receiver_count() == 0 {
            return;
        }
        let _ = self
            .event_tx
            .send(HiveEvent::State(HiveState::from_entries(entries, now)));
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            heartbeats_accepted: self.counters.heartbeats_accepted.load(Ordering::Relaxed),
            heartbeats_rejected: self.counters.heartbeats_rejected.load(Ordering::Relaxed),
            messages_published: self.counters.messages_published.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic liveness sweep; stops when `shutdown` fires
    pub fn spawn_sweeper(&self, mut shutdown: ShutdownToken) -> JoinHandle<()> {
        let bus = self.clone();
        let interval = self.config.sweep_interval();

        tokio::spawn(async move {
            info!("Liveness sweeper started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let transitions = bus.sweep().await;
                        if !transitions.is_empty() {
                            debug!("Sweep applied {} liveness transitions", transitions.len());
                        }
                    }
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }

            info!("Liveness sweeper stopped");
        })
    }
}
