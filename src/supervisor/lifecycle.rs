use super::liveness;
use super::registry::{Launcher, ProcessRegistry, WorkerRole, WorkerState};
use super::router::{self, RouterOptions};
use super::shutdown::ShutdownHandle;
use crate::config::WorkerSpec;
use crate::error::Result;
use crate::ipc::Message;
use crate::settings;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Why a supervisor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Termination signal
    Interrupted,
    /// A worker sent `quit`
    Requested { by: String },
    /// An administrative command ran in place of the router
    Administrative,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Interrupted => write!(f, "interrupt signal"),
            ShutdownCause::Requested { by } => write!(f, "quit requested by '{}'", by),
            ShutdownCause::Administrative => write!(f, "administrative command completed"),
        }
    }
}

/// One-shot mutation applied by the supervisor instead of starting the router.
#[derive(Debug, Clone)]
pub enum AdminCommand {
    /// Store the digest of `value` as the admin credential; empty clears it
    SetCredential { value: String, settings_path: PathBuf },
}

impl AdminCommand {
    pub fn apply(&self) -> Result<()> {
        match self {
            AdminCommand::SetCredential {
                value,
                settings_path,
            } => {
                let stored = settings::set_credential(settings_path, value)?;
                if stored.is_some() {
                    info!("Admin credential updated in {}", settings_path.display());
                    println!("Password updated");
                } else {
                    info!("Admin credential cleared in {}", settings_path.display());
                    println!("Password cleared");
                }
                Ok(())
            }
        }
    }
}

/// Drives every worker from spawn to termination.
pub struct Supervisor {
    registry: ProcessRegistry,
    options: RouterOptions,
    shutdown: ShutdownHandle,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>, options: RouterOptions, shutdown: ShutdownHandle) -> Self {
        Self {
            registry: ProcessRegistry::new(launcher),
            options,
            shutdown,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Spawn `workers` in order, confirm they are alive, then either apply
    /// `admin` or initialize everyone and route commands. The shutdown
    /// sequence runs on every path, including startup failure.
    pub async fn launch(&mut self, workers: &[WorkerSpec], admin: Option<AdminCommand>) -> Result<ShutdownCause> {
        match self.start(workers).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Interrupted during startup");
                self.shutdown_sequence().await;
                return Ok(ShutdownCause::Interrupted);
            }
            Err(e) => {
                error!("Startup failed: {}", e);
                self.shutdown_sequence().await;
                return Err(e);
            }
        }

        let cause = match admin {
            Some(command) => {
                if let Err(e) = command.apply() {
                    error!("Administrative command failed: {}", e);
                    self.shutdown_sequence().await;
                    return Err(e);
                }
                ShutdownCause::Administrative
            }
            None => {
                self.initialize_all().await;
                router::run(&mut self.registry, &self.options, &self.shutdown).await
            }
        };

        info!("Shutting down: {}", cause);
        self.shutdown_sequence().await;
        Ok(cause)
    }

    /// Returns `false` if shutdown was triggered before every worker
    /// confirmed it is alive.
    async fn start(&mut self, workers: &[WorkerSpec]) -> Result<bool> {
        for spec in workers {
            self.registry.spawn(&spec.name, spec.role)?;
        }

        let shutdown = self.shutdown.clone();
        tokio::select! {
            confirmed = liveness::confirm_all_alive(&mut self.registry) => confirmed.map(|_| true),
            _ = shutdown.wait() => Ok(false),
        }
    }

    /// Send `init` to every worker in registry order. No acknowledgment is awaited.
    pub async fn initialize_all(&mut self) {
        for worker in self.registry.iter_mut() {
            match worker.channel.send(&Message::init()).await {
                Ok(()) => {
                    worker.state = WorkerState::Initialized;
                    info!("Initialized worker '{}'", worker.name);
                }
                Err(e) => {
                    warn!("Failed to initialize worker '{}': {}", worker.name, e);
                    if e.is_closed() {
                        worker.disconnect();
                    }
                }
            }
        }
    }

    /// Stop workers in reverse registry order. Foreground workers are
    /// killed; cooperative workers are sent `quit` and joined.
    pub async fn shutdown_sequence(&mut self) {
        info!("Stopping {} workers", self.registry.len());

        while let Some(mut worker) = self.registry.pop() {
            worker.state = WorkerState::Quitting;

            let joined = match worker.role {
                WorkerRole::Foreground => {
                    info!("Terminating foreground worker '{}'", worker.name);
                    worker.handle.kill().await
                }
                WorkerRole::Cooperative => {
                    let delivered = if worker.is_connected() {
                        match worker.channel.send(&Message::quit()).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!("Could not send quit to worker '{}': {}", worker.name, e);
                                false
                            }
                        }
                    } else {
                        false
                    };

                    if delivered {
                        info!("Waiting for worker '{}' to exit", worker.name);
                        worker.handle.wait().await
                    } else {
                        warn!("Worker '{}' cannot be asked to quit, terminating", worker.name);
                        worker.handle.kill().await
                    }
                }
            };

            if let Err(e) = joined {
                warn!("Error while stopping worker '{}': {}", worker.name, e);
            }
            worker.state = WorkerState::Terminated;
            info!(
                "Worker '{}' terminated after {}s",
                worker.name,
                worker.uptime_secs()
            );
        }

        println!("Shutting down norn...");
    }
}
