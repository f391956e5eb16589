use super::broker::{self, Backlog};
use super::lifecycle::ShutdownCause;
use super::registry::{ProcessRegistry, WorkerState};
use super::shutdown::ShutdownHandle;
use crate::ipc::{Command, Envelope};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Idle backoff for the command router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Quiet period after which the router starts sleeping between passes
    pub idle_threshold: Duration,
    /// Length of each idle sleep
    pub idle_sleep: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(1),
            idle_sleep: Duration::from_secs(1),
        }
    }
}

/// Service every worker's control channel until a worker sends `quit` or
/// shutdown is triggered.
///
/// Workers are polled in registry order. A `connect` is brokered to
/// completion before polling resumes, and any requests the target sent
/// while it was being asked are served right after it.
pub async fn run(
    registry: &mut ProcessRegistry,
    options: &RouterOptions,
    shutdown: &ShutdownHandle,
) -> ShutdownCause {
    for worker in registry.iter_mut() {
        if worker.state == WorkerState::Initialized {
            worker.state = WorkerState::Running;
        }
    }
    info!("Command router running ({} workers)", registry.len());

    let mut backlog = Backlog::new();
    let mut last_activity = Instant::now();
    loop {
        if shutdown.is_shutting_down() {
            info!("Command router interrupted");
            return ShutdownCause::Interrupted;
        }

        for index in 0..registry.len() {
            let Some(received) = receive_pending(registry, index).await else {
                continue;
            };
            last_activity = Instant::now();

            backlog.push_back(received);
            while let Some((name, envelope)) = backlog.pop_front() {
                if let Some(cause) = route(registry, &name, envelope, &mut backlog).await {
                    return cause;
                }
            }
        }

        if last_activity.elapsed() > options.idle_threshold {
            tokio::select! {
                _ = tokio::time::sleep(options.idle_sleep) => {}
                _ = shutdown.wait() => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
}

async fn route(
    registry: &mut ProcessRegistry,
    name: &str,
    envelope: Envelope,
    backlog: &mut Backlog,
) -> Option<ShutdownCause> {
    match envelope.message.command {
        Command::Quit => {
            info!("Worker '{}' requested shutdown", name);
            Some(ShutdownCause::Requested { by: name.to_string() })
        }
        Command::Connect => {
            if let Err(e) = broker::connect(registry, name, envelope.message.payload, backlog).await {
                debug!("Connect from '{}' not completed: {}", name, e);
            }
            None
        }
        ref other => {
            debug!("Ignoring unexpected '{}' from worker '{}'", other.as_str(), name);
            None
        }
    }
}

/// Take the next frame from worker `index` if one is already waiting.
async fn receive_pending(registry: &mut ProcessRegistry, index: usize) -> Option<(String, Envelope)> {
    let worker = registry.get_mut(index)?;
    if !worker.is_connected() {
        return None;
    }

    let pending = match worker.channel.poll() {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Polling worker '{}' failed: {}", worker.name, e);
            worker.disconnect();
            return None;
        }
    };
    if !pending {
        return None;
    }

    match worker.channel.recv().await {
        Ok(envelope) => Some((worker.name.clone(), envelope)),
        Err(e) if e.is_recoverable() => {
            warn!("Dropping unreadable frame from worker '{}': {}", worker.name, e);
            None
        }
        Err(e) => {
            if !e.is_closed() {
                warn!("Control channel of worker '{}' is unusable: {}", worker.name, e);
            }
            worker.disconnect();
            None
        }
    }
}
