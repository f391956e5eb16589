//! Worker side of the control protocol.
//!
//! A worker is the same binary started as `norn worker <name>`. It adopts
//! the channel end the supervisor left on descriptor 3, answers the control
//! protocol, and runs one [`Subsystem`]. It never sees the supervisor's
//! registry; the only way to reach a sibling is to ask for a channel.

pub mod links;
pub mod subsystems;

pub use links::Links;

use crate::clienv;
use crate::error::{WorkerError, WorkerResult};
use crate::ipc::{Channel, Command, Envelope, Message};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Link name of the supervisor channel.
pub const PARENT: &str = "parent";

/// Idle backoff for the worker run loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub idle_threshold: Duration,
    pub idle_sleep: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
impl WorkerOptions {
    pub(crate) fn fast() -> Self {
        Self {
            idle_threshold: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(5),
        }
    }
}

/// The part of a worker that does actual work.
#[async_trait]
pub trait Subsystem: Send {
    /// Called once, when the supervisor sends `init`
    async fn init(&mut self, _links: &mut Links) -> WorkerResult<()> {
        Ok(())
    }

    /// A frame the control protocol does not consume itself
    async fn handle(&mut self, links: &mut Links, from: &str, message: Message) -> WorkerResult<()>;

    /// Called on every pass of the run loop after `init`
    async fn tick(&mut self, _links: &mut Links) -> WorkerResult<()> {
        Ok(())
    }

    /// Release resources before the process exits
    async fn shutdown(&mut self, _links: &mut Links) {}
}

enum Flow {
    Continue,
    /// Asked to quit on the named link; acknowledge there first
    Quit(String),
    Exit,
}

pub struct Worker {
    name: String,
    links: Links,
    subsystem: Box<dyn Subsystem>,
    options: WorkerOptions,
    initialized: bool,
}

impl Worker {
    pub fn new(name: &str, parent: Channel, subsystem: Box<dyn Subsystem>, options: WorkerOptions) -> Self {
        Self {
            name: name.to_string(),
            links: Links::new(name, parent),
            subsystem,
            options,
            initialized: false,
        }
    }

    /// Serve the control protocol until told to quit or the supervisor goes away.
    pub async fn run(mut self) -> WorkerResult<()> {
        debug!("Worker '{}' waiting for supervisor", self.name);
        let mut last_activity = Instant::now();

        loop {
            if self.links.quit_requested() {
                return self.finish(Flow::Quit(PARENT.to_string())).await;
            }

            if let Some((from, received)) = self.links.next().await {
                last_activity = Instant::now();
                match received {
                    Ok(envelope) => match self.dispatch(&from, envelope).await {
                        Flow::Continue => {}
                        flow => return self.finish(flow).await,
                    },
                    Err(e) if e.is_recoverable() => {
                        warn!("Unreadable frame on link '{}': {}", from, e)
                    }
                    Err(e) if from == PARENT => {
                        warn!("Worker '{}' lost its supervisor link: {}", self.name, e);
                        return self.finish(Flow::Exit).await;
                    }
                    Err(e) => {
                        warn!("Dropping link '{}': {}", from, e);
                        self.links.remove(&from);
                    }
                }
            }

            if self.initialized {
                report(&self.name, self.subsystem.tick(&mut self.links).await);
            }

            if last_activity.elapsed() > self.options.idle_threshold {
                tokio::time::sleep(self.options.idle_sleep).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    async fn dispatch(&mut self, from: &str, envelope: Envelope) -> Flow {
        match envelope.message.command {
            Command::Alive => {
                report(&self.name, self.links.send(from, &Message::alive()).await);
                Flow::Continue
            }
            Command::Init if from == PARENT => {
                if self.initialized {
                    debug!("Worker '{}' ignoring repeated init", self.name);
                } else {
                    self.initialized = true;
                    info!("Worker '{}' initialized", self.name);
                    report(&self.name, self.subsystem.init(&mut self.links).await);
                }
                Flow::Continue
            }
            Command::Quit => Flow::Quit(from.to_string()),
            Command::Close => {
                // The peer may already be gone.
                if let Err(e) = self.links.send(from, &Message::ok()).await {
                    debug!("Could not acknowledge close on '{}': {}", from, e);
                }
                self.links.remove(from);
                debug!("Link '{}' closed", from);
                if from == PARENT || self.links.is_empty() {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            }
            Command::Connect if from == PARENT => {
                report(&self.name, self.links.accept_offer(envelope).await);
                Flow::Continue
            }
            Command::Connect => {
                warn!("Peer '{}' sent a connect offer; only the supervisor may", from);
                let reply = Message::error("connect offers come from the supervisor");
                report(&self.name, self.links.send(from, &reply).await);
                Flow::Continue
            }
            _ => {
                let result = self
                    .subsystem
                    .handle(&mut self.links, from, envelope.message)
                    .await;
                report(&self.name, result);
                Flow::Continue
            }
        }
    }

    async fn finish(mut self, flow: Flow) -> WorkerResult<()> {
        if let Flow::Quit(link) = flow {
            if let Err(e) = self.links.send(&link, &Message::ok()).await {
                debug!("Could not acknowledge quit on '{}': {}", link, e);
            }
        }
        self.subsystem.shutdown(&mut self.links).await;
        info!("Worker '{}' exiting", self.name);
        Ok(())
    }
}

fn report(worker: &str, result: WorkerResult<()>) {
    match result {
        Ok(()) | Err(WorkerError::QuitRequested) => {}
        Err(e) => warn!("Worker '{}': {}", worker, e),
    }
}

/// Entry point of a `norn worker <name>` process.
pub async fn entry(name: &str) -> anyhow::Result<()> {
    let parent = Channel::from_inherited().context("Worker started without a supervisor channel")?;
    let subsystem = subsystems::build(name, clienv::settings_path())
        .ok_or_else(|| anyhow!("Unknown worker subsystem '{}'", name))?;

    let worker = Worker::new(name, parent, subsystem, WorkerOptions::default());
    worker
        .run()
        .instrument(tracing::info_span!("worker", name = %name))
        .await?;
    Ok(())
}
