//! Built-in worker subsystems.

use super::{Links, Subsystem};
use crate::error::WorkerResult;
use crate::ipc::{Command, Message, Payload};
use crate::settings::Settings;
use crate::supervisor::WorkerRole;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Subsystems the `norn worker` entry point can run, in default spawn order.
pub const BUILTIN: &[&str] = &["database", "io_manager", "tcp", "webapi"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN.contains(&name)
}

/// Role a built-in worker gets when the config does not say otherwise.
pub fn default_role(name: &str) -> WorkerRole {
    match name {
        "webapi" => WorkerRole::Foreground,
        _ => WorkerRole::Cooperative,
    }
}

pub fn build(name: &str, settings_path: PathBuf) -> Option<Box<dyn Subsystem>> {
    let subsystem: Box<dyn Subsystem> = match name {
        "database" => Box::new(Database { settings_path }),
        "io_manager" => Box::new(IoManager { database: false }),
        "tcp" => Box::new(Passive { name: "tcp" }),
        "webapi" => Box::new(Passive { name: "webapi" }),
        _ => return None,
    };
    Some(subsystem)
}

/// Serves reads from the shared settings store to other workers.
struct Database {
    settings_path: PathBuf,
}

#[async_trait]
impl Subsystem for Database {
    async fn handle(&mut self, links: &mut Links, from: &str, message: Message) -> WorkerResult<()> {
        match (&message.command, &message.payload) {
            (Command::Custom(name), Payload::Text(key)) if name == "get_setting" => {
                let settings = Settings::load(&self.settings_path)?;
                let reply = match settings.get(key) {
                    Some(value) => Message::custom("setting", Payload::Text(value.to_string())),
                    None => Message::error(format!("no setting '{}'", key)),
                };
                links.send(from, &reply).await
            }
            (command, _) => {
                debug!("database: ignoring '{}' from '{}'", command.as_str(), from);
                Ok(())
            }
        }
    }
}

/// Field-device I/O. Opens a line to `database` as soon as it starts.
struct IoManager {
    database: bool,
}

#[async_trait]
impl Subsystem for IoManager {
    async fn init(&mut self, links: &mut Links) -> WorkerResult<()> {
        match links.request_connection("database").await {
            Ok(()) => {
                self.database = true;
                info!("io_manager linked to database");
            }
            Err(e) => warn!("io_manager running without database: {}", e),
        }
        Ok(())
    }

    async fn handle(&mut self, _links: &mut Links, from: &str, message: Message) -> WorkerResult<()> {
        debug!("io_manager: '{}' from '{}'", message.command.as_str(), from);
        Ok(())
    }

    async fn shutdown(&mut self, links: &mut Links) {
        if self.database {
            let _ = links.send("database", &Message::close()).await;
        }
    }
}

/// Placeholder for subsystems whose logic lives outside the supervisor.
struct Passive {
    name: &'static str,
}

#[async_trait]
impl Subsystem for Passive {
    async fn handle(&mut self, _links: &mut Links, from: &str, message: Message) -> WorkerResult<()> {
        debug!("{}: '{}' from '{}'", self.name, message.command.as_str(), from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::Channel;
    use crate::settings;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_names() {
        assert!(is_builtin("tcp"));
        assert!(!is_builtin("parent"));
        assert_eq!(default_role("webapi"), WorkerRole::Foreground);
        assert_eq!(default_role("database"), WorkerRole::Cooperative);
        assert!(build("mainframe", PathBuf::from("/tmp/settings.toml")).is_none());
    }

    #[tokio::test]
    async fn test_database_serves_settings() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("settings.toml");
        settings::set_credential(&path, "hunter2")?;

        let mut database = build("database", path).expect("database is built in");
        let (_supervisor, parent) = Channel::pair()?;
        let mut links = Links::new("database", parent);
        let (mut peer, link) = Channel::pair()?;
        links.insert("io_manager", link);

        let request = Message::custom("get_setting", Payload::Text(settings::CREDENTIAL_KEY.into()));
        database.handle(&mut links, "io_manager", request).await?;
        let reply = peer.recv().await?;
        assert_eq!(
            reply.message.payload,
            Payload::Text(settings::credential_digest("hunter2"))
        );

        let missing = Message::custom("get_setting", Payload::Text("port".into()));
        database.handle(&mut links, "io_manager", missing).await?;
        assert_eq!(peer.recv().await?.message.command, Command::Error);
        Ok(())
    }
}
