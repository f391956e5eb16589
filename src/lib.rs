#[cfg(not(unix))]
compile_error!("norn passes channel ends between processes over Unix domain sockets and only builds on Unix targets");

pub mod clienv;
pub mod config;
pub mod error;
pub mod ipc;
pub mod settings;
pub mod supervisor;
pub mod worker;

pub use config::{GatewayConfig, WorkerSpec};
pub use error::{ChannelError, Result, SettingsError, SupervisorError, WorkerError};
pub use supervisor::Supervisor;
