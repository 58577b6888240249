//! Hive-Mind Coordination
//!
//! Liveness and coherence tracking for independent analytic subsystems,
//! plus best-effort broadcast and assistance messaging between them.

pub mod bus;
pub mod message;
pub mod state;

pub use bus::{BusStats, HiveBus, LivenessTransition};
pub use message::{HiveEvent, HiveMessage, ASSISTANCE_TOPIC};
pub use state::{aggregate_coherence, HiveState, LivenessStatus, SubsystemEntry};
