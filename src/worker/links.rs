use super::PARENT;
use crate::error::{ChannelError, WorkerError, WorkerResult};
use crate::ipc::{Channel, Command, Envelope, Message, Payload};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Named channels held by one worker: the supervisor link plus one per
/// brokered peer.
pub struct Links {
    name: String,
    channels: Vec<(String, Channel)>,
    deferred: VecDeque<(String, Envelope)>,
    quit_requested: bool,
}

impl Links {
    pub fn new(name: &str, parent: Channel) -> Self {
        Self {
            name: name.to_string(),
            channels: vec![(PARENT.to_string(), parent)],
            deferred: VecDeque::new(),
            quit_requested: false,
        }
    }

    /// This worker's own name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn contains(&self, link: &str) -> bool {
        self.channels.iter().any(|(n, _)| n == link)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether the supervisor sent `quit` while a request was in flight
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    pub fn insert(&mut self, link: &str, channel: Channel) {
        match self.channels.iter_mut().find(|(n, _)| n == link) {
            Some((_, existing)) => {
                debug!("Replacing link '{}'", link);
                *existing = channel;
            }
            None => self.channels.push((link.to_string(), channel)),
        }
    }

    pub fn remove(&mut self, link: &str) -> Option<Channel> {
        let index = self.channels.iter().position(|(n, _)| n == link)?;
        Some(self.channels.remove(index).1)
    }

    fn channel_mut(&mut self, link: &str) -> WorkerResult<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|(n, _)| n == link)
            .map(|(_, c)| c)
            .ok_or_else(|| WorkerError::NoSuchLink(link.to_string()))
    }

    pub async fn send(&mut self, link: &str, message: &Message) -> WorkerResult<()> {
        self.channel_mut(link)?
            .send(message)
            .await
            .map_err(|e| WorkerError::link(link, e))
    }

    /// Next frame from any link, without blocking. Frames set aside during a
    /// connection request come first, then links in insertion order.
    pub async fn next(&mut self) -> Option<(String, Result<Envelope, ChannelError>)> {
        if let Some((link, envelope)) = self.deferred.pop_front() {
            return Some((link, Ok(envelope)));
        }

        for (link, channel) in self.channels.iter_mut() {
            match channel.poll() {
                Ok(true) => return Some((link.clone(), channel.recv().await)),
                Ok(false) => {}
                Err(e) => return Some((link.clone(), Err(e))),
            }
        }
        None
    }

    /// Ask the supervisor for a direct channel to `peer` and wait for it.
    ///
    /// While waiting, `alive` probes are answered and connect offers are
    /// accepted, so two workers connecting to each other at the same time
    /// both make progress. A `quit` aborts the request; other frames are
    /// kept for the run loop.
    pub async fn request_connection(&mut self, peer: &str) -> WorkerResult<()> {
        if self.contains(peer) {
            return Ok(());
        }

        let request = Message::connect_request(self.name.clone(), peer);
        self.send(PARENT, &request).await?;
        debug!("Requested a channel to '{}'", peer);

        loop {
            let envelope = self
                .channel_mut(PARENT)?
                .recv()
                .await
                .map_err(|e| WorkerError::link(PARENT, e))?;

            match envelope.message.command {
                Command::Ok => {
                    let channel = envelope.attachment.ok_or_else(|| WorkerError::Refused {
                        peer: peer.to_string(),
                        reason: "reply carried no channel".into(),
                    })?;
                    self.insert(peer, channel);
                    info!("Connected to '{}'", peer);
                    return Ok(());
                }
                Command::Error => {
                    return Err(WorkerError::Refused {
                        peer: peer.to_string(),
                        reason: envelope.message.reason().unwrap_or("error").to_string(),
                    });
                }
                Command::Alive => self.send(PARENT, &Message::alive()).await?,
                Command::Connect => self.accept_offer(envelope).await?,
                Command::Quit => {
                    self.quit_requested = true;
                    return Err(WorkerError::QuitRequested);
                }
                _ => self.deferred.push_back((PARENT.to_string(), envelope)),
            }
        }
    }

    /// Take the channel end offered by the supervisor and confirm with `ok`.
    pub(crate) async fn accept_offer(&mut self, envelope: Envelope) -> WorkerResult<()> {
        match (envelope.message.payload, envelope.attachment) {
            (Payload::Peer(peer), Some(channel)) => {
                self.insert(&peer, channel);
                info!("Accepted channel from '{}'", peer);
                self.send(PARENT, &Message::ok()).await
            }
            _ => {
                warn!("Rejecting connect offer without a peer channel");
                self.send(PARENT, &Message::error("connect offer carried no channel"))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_request_connection_answers_probes_while_waiting() {
        let (supervisor, worker_end) = Channel::pair().unwrap();
        let mut links = Links::new("io_manager", worker_end);

        let parent = tokio::spawn(async move {
            let mut supervisor = supervisor;
            let request = supervisor.recv().await.unwrap();
            assert_eq!(request.message, Message::connect_request("io_manager", "database"));

            supervisor.send(&Message::alive()).await.unwrap();
            assert_eq!(supervisor.recv().await.unwrap().message, Message::alive());

            supervisor
                .send(&Message::custom("status", Payload::Empty))
                .await
                .unwrap();

            let (_database_end, requester_end) = Channel::pair().unwrap();
            supervisor.send_with(&Message::ok(), requester_end).await.unwrap();
            supervisor
        });

        tokio::time::timeout(Duration::from_secs(5), links.request_connection("database"))
            .await
            .expect("request answered")
            .unwrap();
        assert_eq!(links.names(), vec![PARENT, "database"]);

        let (from, deferred) = links.next().await.expect("status frame was kept");
        assert_eq!(from, PARENT);
        assert_eq!(deferred.unwrap().message.command, Command::Custom("status".into()));
        parent.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_reply_refuses_connection() {
        let (mut supervisor, worker_end) = Channel::pair().unwrap();
        let mut links = Links::new("tcp", worker_end);

        supervisor.send(&Message::error("unknown peer 'db'")).await.unwrap();
        let err = links.request_connection("db").await.unwrap_err();

        assert!(matches!(err, WorkerError::Refused { ref reason, .. } if reason.contains("unknown peer")));
        assert!(!links.contains("db"));
        assert_eq!(
            supervisor.recv().await.unwrap().message,
            Message::connect_request("tcp", "db")
        );
    }

    #[tokio::test]
    async fn test_quit_aborts_pending_request() {
        let (mut supervisor, worker_end) = Channel::pair().unwrap();
        let mut links = Links::new("tcp", worker_end);

        supervisor.send(&Message::quit()).await.unwrap();
        let err = links.request_connection("database").await.unwrap_err();

        assert!(matches!(err, WorkerError::QuitRequested));
        assert!(links.quit_requested());
    }

    #[tokio::test]
    async fn test_send_to_unknown_link() {
        let (_supervisor, worker_end) = Channel::pair().unwrap();
        let mut links = Links::new("tcp", worker_end);

        let err = links.send("webapi", &Message::ok()).await.unwrap_err();
        assert!(matches!(err, WorkerError::NoSuchLink(ref name) if name == "webapi"));
    }
}
