use super::registry::{ProcessRegistry, WorkerDescriptor, WorkerState};
use crate::error::{ChannelError, Result, SupervisorError};
use crate::ipc::{Command, Message};
use tracing::{debug, info};

/// Probe one worker: discard anything already queued, send `alive`, and
/// report whether the reply was `alive`.
pub async fn query_alive(worker: &mut WorkerDescriptor) -> std::result::Result<bool, ChannelError> {
    while worker.channel.poll()? {
        let stale = worker.channel.recv().await?;
        debug!(
            "Discarding stale '{}' from worker '{}' before probe",
            stale.message.command.as_str(),
            worker.name
        );
    }

    worker.channel.send(&Message::alive()).await?;
    let reply = worker.channel.recv().await?;
    Ok(reply.message.command == Command::Alive)
}

/// Block until every spawned worker has answered a probe with `alive`.
///
/// Workers already confirmed are not probed again. There is no timeout;
/// a worker that never answers stalls startup.
pub async fn confirm_all_alive(registry: &mut ProcessRegistry) -> Result<()> {
    loop {
        let mut pending = 0;
        for worker in registry.iter_mut() {
            if worker.state != WorkerState::Spawned {
                continue;
            }
            let confirmed = query_alive(worker).await.map_err(|source| {
                if source.is_closed() {
                    worker.disconnect();
                }
                SupervisorError::channel(&worker.name, source)
            })?;

            if confirmed {
                worker.state = WorkerState::Alive;
                debug!("Worker '{}' is alive", worker.name);
            } else {
                pending += 1;
            }
        }

        if pending == 0 {
            info!("All {} workers confirmed alive", registry.len());
            return Ok(());
        }
        debug!("{} workers not yet confirmed, probing again", pending);
    }
}
