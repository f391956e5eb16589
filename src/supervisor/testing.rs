//! In-process launchers for supervisor tests.

use super::registry::{Launcher, WorkerHandle};
use crate::error::WorkerResult;
use crate::ipc::{Channel, Command, Message, Payload};
use crate::worker::{Links, Subsystem, Worker, WorkerOptions, PARENT};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Ordered log of launcher and subsystem events shared across tasks.
#[derive(Clone, Default)]
pub(crate) struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.matching_any(&[prefix])
    }

    pub fn matching_any(&self, prefixes: &[&str]) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| prefixes.iter().any(|p| e.starts_with(p)))
            .collect()
    }
}

/// Hands worker ends to the test instead of starting anything.
#[derive(Default)]
pub(crate) struct ManualLauncher {
    journal: Journal,
    ends: Mutex<HashMap<String, Channel>>,
    waiting: Mutex<HashMap<String, oneshot::Sender<Channel>>>,
    refused: Mutex<HashSet<String>>,
}

impl ManualLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.journal
            .matching("spawn:")
            .into_iter()
            .map(|e| e.trim_start_matches("spawn:").to_string())
            .collect()
    }

    /// Worker end of an already launched worker.
    pub fn take(&self, name: &str) -> Channel {
        self.ends
            .lock()
            .unwrap()
            .remove(name)
            .unwrap_or_else(|| panic!("worker '{}' was not launched", name))
    }

    /// Worker end of a worker that is launched later.
    pub fn take_later(&self, name: &str) -> oneshot::Receiver<Channel> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().insert(name.to_string(), tx);
        rx
    }

    /// Make launching `name` fail.
    pub fn fail_on(&self, name: &str) {
        self.refused.lock().unwrap().insert(name.to_string());
    }
}

impl Launcher for ManualLauncher {
    fn launch(&self, name: &str, channel: Channel) -> std::io::Result<Box<dyn WorkerHandle>> {
        if self.refused.lock().unwrap().contains(name) {
            return Err(std::io::Error::other(format!("launch of '{}' refused", name)));
        }
        self.journal.record(format!("spawn:{}", name));

        match self.waiting.lock().unwrap().remove(name) {
            Some(tx) => {
                let _ = tx.send(channel);
            }
            None => {
                self.ends.lock().unwrap().insert(name.to_string(), channel);
            }
        }
        Ok(Box::new(ManualHandle {
            name: name.to_string(),
            journal: self.journal.clone(),
        }))
    }
}

/// Stands in for a process that exits as soon as it is waited on.
struct ManualHandle {
    name: String,
    journal: Journal,
}

#[async_trait]
impl WorkerHandle for ManualHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        self.journal.record(format!("exit:{}", self.name));
        Ok(())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.journal.record(format!("kill:{}", self.name));
        Ok(())
    }
}

/// Scripted behavior for a worker run by [`TaskLauncher`].
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Answer the control protocol and nothing else
    Idle,
    /// On init, connect to `peer` and send it a `ping`
    ConnectAndPing { peer: String },
    /// Answer a `ping` with `pong`, then ask the supervisor to quit
    AnswerPingThenQuit,
}

/// Runs real worker loops as tokio tasks.
pub(crate) struct TaskLauncher {
    journal: Journal,
    scripts: HashMap<String, Script>,
}

impl TaskLauncher {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            scripts: HashMap::new(),
        }
    }

    pub fn script(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }
}

impl Launcher for TaskLauncher {
    fn launch(&self, name: &str, channel: Channel) -> std::io::Result<Box<dyn WorkerHandle>> {
        self.journal.record(format!("spawn:{}", name));
        let subsystem = Scripted {
            name: name.to_string(),
            script: self.scripts.get(name).cloned().unwrap_or(Script::Idle),
            journal: self.journal.clone(),
        };
        let worker = Worker::new(name, channel, Box::new(subsystem), WorkerOptions::fast());
        let task = tokio::spawn(async move {
            let _ = worker.run().await;
        });

        Ok(Box::new(TaskHandle {
            name: name.to_string(),
            journal: self.journal.clone(),
            task,
        }))
    }
}

struct TaskHandle {
    name: String,
    journal: Journal,
    task: JoinHandle<()>,
}

#[async_trait]
impl WorkerHandle for TaskHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        let result = (&mut self.task).await;
        self.journal.record(format!("exit:{}", self.name));
        result.map_err(std::io::Error::other)
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.task.abort();
        let _ = (&mut self.task).await;
        self.journal.record(format!("kill:{}", self.name));
        Ok(())
    }
}

struct Scripted {
    name: String,
    script: Script,
    journal: Journal,
}

#[async_trait]
impl Subsystem for Scripted {
    async fn init(&mut self, links: &mut Links) -> WorkerResult<()> {
        self.journal.record(format!("init:{}", self.name));

        if let Script::ConnectAndPing { peer } = &self.script {
            links.request_connection(peer).await?;
            self.journal.record(format!("{} linked to {}", self.name, peer));
            links
                .send(peer, &Message::custom("ping", Payload::Text(self.name.clone())))
                .await?;
        }
        Ok(())
    }

    async fn handle(&mut self, links: &mut Links, from: &str, message: Message) -> WorkerResult<()> {
        match (&self.script, &message.command) {
            (Script::AnswerPingThenQuit, Command::Custom(name)) if name == "ping" => {
                self.journal.record(format!("{} got ping from {}", self.name, from));
                links.send(from, &Message::custom("pong", Payload::Empty)).await?;
                links.send(PARENT, &Message::quit()).await?;
            }
            (_, command) => {
                self.journal.record(format!("{} got {} from {}", self.name, command.as_str(), from));
            }
        }
        Ok(())
    }
}
