//! Norn supervisor - spawns workers and brokers channels between them
//!
//! The supervisor is the only process holding a [`ProcessRegistry`]. It:
//! - Spawns every configured worker and confirms each one is alive
//! - Sends `init`, then routes `quit` and `connect` commands
//! - Introduces workers to each other with private channel pairs
//! - Stops workers in reverse spawn order
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 norn supervisor               │
//! ├──────────────────────────────────────────────┤
//! │  Registry  │  Router (poll)  │  Broker        │
//! │  (spawn)   │  quit / connect │  (introduce)   │
//! ├──────────────────────────────────────────────┤
//! │ database │ io_manager │ tcp │ webapi (fg)     │
//! └──────────────────────────────────────────────┘
//! ```

pub mod broker;
pub mod lifecycle;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

pub use lifecycle::{AdminCommand, ShutdownCause, Supervisor};
pub use registry::{
    Launcher, ProcessLauncher, ProcessRegistry, WorkerDescriptor, WorkerHandle, WorkerRole,
    WorkerState,
};
pub use router::RouterOptions;
pub use shutdown::{listen_for_signals, ShutdownCoordinator, ShutdownHandle};
