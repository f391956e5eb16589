use crate::error::{Result, SupervisorError};
use crate::ipc::{prepare_worker, Channel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How a worker is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Honors `quit` on its control channel and is joined
    #[default]
    Cooperative,
    /// Runs a blocking loop of its own and is terminated forcibly
    Foreground,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Cooperative => "cooperative",
            WorkerRole::Foreground => "foreground",
        }
    }
}

/// Lifecycle state tracked by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawned,
    Alive,
    Initialized,
    Running,
    Quitting,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Spawned => "spawned",
            WorkerState::Alive => "alive",
            WorkerState::Initialized => "initialized",
            WorkerState::Running => "running",
            WorkerState::Quitting => "quitting",
            WorkerState::Terminated => "terminated",
        }
    }
}

/// Handle to a started worker process.
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, if the worker is a real process
    fn id(&self) -> Option<u32>;

    /// Block until the worker exits
    async fn wait(&mut self) -> std::io::Result<()>;

    /// Terminate the worker without asking and reap it
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts a worker that owns `channel` as its supervisor link.
pub trait Launcher: Send + Sync {
    fn launch(&self, name: &str, channel: Channel) -> std::io::Result<Box<dyn WorkerHandle>>;
}

/// Launches workers by re-executing a binary as `<program> worker <name>`.
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch workers from the running executable
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, name: &str, channel: Channel) -> std::io::Result<Box<dyn WorkerHandle>> {
        let fd = channel.as_raw_fd();

        let mut cmd = Command::new(&self.program);
        cmd.args(["worker", name]);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(false);

        // SAFETY: prepare_worker only calls dup2/fcntl/signal, all async-signal-safe.
        unsafe {
            cmd.pre_exec(move || prepare_worker(fd));
        }

        let child = cmd.spawn()?;
        info!("Started worker '{}' with PID {:?}", name, child.id());

        // The child holds its own copy now.
        drop(channel);
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        let status = self.child.wait().await?;
        debug!("Worker process exited with {}", status);
        Ok(())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

/// Supervisor-side record of one worker.
pub struct WorkerDescriptor {
    pub name: String,
    pub role: WorkerRole,
    pub state: WorkerState,
    pub channel: Channel,
    pub(crate) handle: Box<dyn WorkerHandle>,
    connected: bool,
    started_at: Instant,
}

impl WorkerDescriptor {
    pub fn pid(&self) -> Option<u32> {
        self.handle.id()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Whether the control channel is still usable
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Stop polling this worker's control channel.
    pub fn disconnect(&mut self) {
        if self.connected {
            warn!("Worker '{}' is no longer reachable on its control channel", self.name);
        }
        self.connected = false;
    }
}

impl std::fmt::Debug for WorkerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDescriptor")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("connected", &self.connected)
            .finish()
    }
}

/// Ordered table of running workers. Registration order is spawn order;
/// shutdown walks it in reverse.
pub struct ProcessRegistry {
    workers: Vec<WorkerDescriptor>,
    launcher: Arc<dyn Launcher>,
}

impl ProcessRegistry {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            workers: Vec::new(),
            launcher,
        }
    }

    /// Create a channel pair, start the worker with its end, and register it.
    pub fn spawn(&mut self, name: &str, role: WorkerRole) -> Result<()> {
        if self.position(name).is_some() {
            return Err(SupervisorError::AlreadyRegistered(name.to_string()));
        }

        let startup_failure = |source| SupervisorError::StartupFailure {
            name: name.to_string(),
            source,
        };

        let (supervisor_end, worker_end) = Channel::pair().map_err(|e| match e {
            crate::error::ChannelError::Io(source) => startup_failure(source),
            other => startup_failure(std::io::Error::other(other.to_string())),
        })?;

        let handle = self
            .launcher
            .launch(name, worker_end)
            .map_err(startup_failure)?;

        debug!("Registered worker '{}' ({})", name, role.as_str());
        self.workers.push(WorkerDescriptor {
            name: name.to_string(),
            role,
            state: WorkerState::Spawned,
            channel: supervisor_end,
            handle,
            connected: true,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Descriptor of `name`, holding the supervisor's end of its channel
    pub fn lookup(&mut self, name: &str) -> Result<&mut WorkerDescriptor> {
        self.workers
            .iter_mut()
            .find(|w| w.name == name)
            .ok_or_else(|| SupervisorError::NotFound(name.to_string()))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.workers.iter().position(|w| w.name == name)
    }

    pub fn get(&self, index: usize) -> Option<&WorkerDescriptor> {
        self.workers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut WorkerDescriptor> {
        self.workers.get_mut(index)
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerDescriptor> {
        self.workers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkerDescriptor> {
        self.workers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Remove the most recently registered worker.
    pub(crate) fn pop(&mut self) -> Option<WorkerDescriptor> {
        self.workers.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testing::ManualLauncher;

    #[tokio::test]
    async fn test_spawn_order_is_registration_order() {
        let launcher = ManualLauncher::new();
        let mut registry = ProcessRegistry::new(launcher.clone());

        for name in ["database", "io_manager", "tcp"] {
            registry.spawn(name, WorkerRole::Cooperative).unwrap();
        }

        assert_eq!(registry.names(), vec!["database", "io_manager", "tcp"]);
        assert_eq!(launcher.launched(), vec!["database", "io_manager", "tcp"]);
        assert!(registry.iter().all(|w| w.state == WorkerState::Spawned));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let mut registry = ProcessRegistry::new(ManualLauncher::new());
        registry.spawn("tcp", WorkerRole::Cooperative).unwrap();

        let err = registry.spawn("tcp", WorkerRole::Foreground).unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRegistered(name) if name == "tcp"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown_worker() {
        let mut registry = ProcessRegistry::new(ManualLauncher::new());
        registry.spawn("database", WorkerRole::Cooperative).unwrap();

        assert!(registry.lookup("database").is_ok());
        assert!(matches!(
            registry.lookup("webapi"),
            Err(SupervisorError::NotFound(name)) if name == "webapi"
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_is_startup_failure() {
        let launcher = Arc::new(ProcessLauncher::new("/nonexistent/norn-binary"));
        let mut registry = ProcessRegistry::new(launcher);

        let err = registry.spawn("database", WorkerRole::Cooperative).unwrap_err();
        assert!(matches!(err, SupervisorError::StartupFailure { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_role_serde_names() {
        #[derive(Deserialize)]
        struct Holder {
            role: WorkerRole,
        }
        let holder: Holder = toml::from_str("role = \"foreground\"").unwrap();
        assert_eq!(holder.role, WorkerRole::Foreground);
        assert_eq!(WorkerRole::default(), WorkerRole::Cooperative);
    }
}
