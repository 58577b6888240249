//! Coordination infrastructure shared by the long-running tasks

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
    ShutdownToken,
};
