use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Owns the shutdown flag for one supervisor run.
pub struct ShutdownCoordinator {
    handle: ShutdownHandle,
}

/// Cloneable trigger/observer for the shutdown flag.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            handle: ShutdownHandle {
                flag: Arc::new(flag),
            },
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.handle.is_shutting_down()
    }

    pub async fn wait(&self) {
        self.handle.wait().await
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once shutdown has been triggered, immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Trigger `handle` on SIGTERM or SIGINT.
///
/// Only the supervisor calls this. Workers ignore SIGINT at the OS level
/// from the moment they are spawned.
pub fn listen_for_signals(handle: ShutdownHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                handle.shutdown();
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                handle.shutdown();
            }
        }
    });
    Ok(())
}
