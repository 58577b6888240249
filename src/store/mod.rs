//! Global State Store
//!
//! One shared, mutable snapshot that many producers merge partial updates
//! into and many observers read from.

pub mod state;
pub mod store;

pub use state::{GlobalState, StatePatch};
pub use store::{GlobalStore, StoreEvent};
