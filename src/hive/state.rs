//! Hive State: liveness entries and the derived coherence aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Liveness of a registered subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    /// Heartbeating within the staleness threshold
    Active,
    /// Silent past the staleness threshold
    Stale,
    /// Silent past the offline threshold
    Offline,
}

impl std::fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessStatus::Active => write!(f, "active"),
            LivenessStatus::Stale => write!(f, "stale"),
            LivenessStatus::Offline => write!(f, "offline"),
        }
    }
}

/// One subsystem as tracked by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemEntry {
    pub id: String,
    pub status: LivenessStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Last reported coherence, always within [0, 1]
    pub coherence: f64,
    /// Weight the subsystem was registered with
    pub base_weight: f64,
    /// Liveness-adjusted weight used by the aggregate
    pub weight: f64,
    pub registered_at: DateTime<Utc>,
    /// Registration order, used to order `active_ids`
    pub(crate) seq: u64,
}

impl SubsystemEntry {
    pub(crate) fn new(id: &str, weight: f64, now: DateTime<Utc>, seq: u64) -> Self {
        Self {
            id: id.to_string(),
            status: LivenessStatus::Active,
            last_heartbeat: now,
            coherence: 0.0,
            base_weight: weight,
            weight,
            registered_at: now,
            seq,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LivenessStatus::Active
    }
}

/// Snapshot of the hive handed to readers and subscribers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HiveState {
    pub subsystems: BTreeMap<String, SubsystemEntry>,
    pub hive_mind_coherence: f64,
    /// Active subsystem ids in registration order
    pub active_ids: Vec<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl HiveState {
    /// Build a snapshot, deriving the aggregate from the entries
    pub(crate) fn from_entries(
        entries: &BTreeMap<String, SubsystemEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut active: Vec<&SubsystemEntry> = entries.values().filter(|e| e.is_active()).collect();
        active.sort_by_key(|e| e.seq);

        Self {
            subsystems: entries.clone(),
            hive_mind_coherence: aggregate_coherence(entries.values()),
            active_ids: active.into_iter().map(|e| e.id.clone()).collect(),
            taken_at: Some(now),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_ids.len()
    }

    pub fn get(&self, id: &str) -> Option<&SubsystemEntry> {
        self.subsystems.get(id)
    }
}

/// Weighted mean of coherence over entries with positive weight, 0 if none
/// or if the sums overflow
pub fn aggregate_coherence<'a, I>(entries: I) -> f64
where
    I: IntoIterator<Item = &'a SubsystemEntry>,
{
    let (weighted, total) = entries
        .into_iter()
        .filter(|e| e.weight > 0.0)
        .fold((0.0, 0.0), |(sum, weights), e| {
            (sum + e.weight * e.coherence, weights + e.weight)
        });

    let mean = weighted / total;
    if total > 0.0 && mean.is_finite() {
        mean.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Clamp a reported coherence into [0, 1]; NaN counts as 0
pub(crate) fn clamp_coherence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
