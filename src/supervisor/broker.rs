//! Peer introduction between two workers.
//!
//! The supervisor creates a fresh channel pair, offers one end to the target
//! over the target's control channel, and hands the other end to the
//! requester once the target accepts. Neither end is retained here, so the
//! two workers talk directly from then on.

use super::registry::ProcessRegistry;
use crate::error::{ChannelError, Result, SupervisorError};
use crate::ipc::{Channel, Command, Envelope, Message, Payload};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Frames a target sent before it answered an offer, tagged with the
/// sender's name. The router services them before polling again.
pub type Backlog = VecDeque<(String, Envelope)>;

/// Serve a `connect` request received from the worker named `requester`.
///
/// The requester always gets exactly one reply: `ok` carrying its end of
/// the new channel, or `error` with the reason. The returned error is for
/// logging; none of these failures stop the supervisor.
pub async fn connect(
    registry: &mut ProcessRegistry,
    requester: &str,
    payload: Payload,
    backlog: &mut Backlog,
) -> Result<()> {
    let outcome = negotiate(registry, requester, payload, backlog).await;

    let worker = registry.lookup(requester)?;
    let (sent, result) = match outcome {
        Ok((target, end)) => {
            info!("Brokered channel '{}' -> '{}'", requester, target);
            (worker.channel.send_with(&Message::ok(), end).await, Ok(()))
        }
        Err(e) => {
            warn!("Connect request from '{}' failed: {}", requester, e);
            (worker.channel.send(&Message::error(e.to_string())).await, Err(e))
        }
    };

    if let Err(source) = sent {
        if source.is_closed() {
            worker.disconnect();
        }
        return Err(SupervisorError::channel(requester, source));
    }
    result
}

async fn negotiate(
    registry: &mut ProcessRegistry,
    requester: &str,
    payload: Payload,
    backlog: &mut Backlog,
) -> Result<(String, Channel)> {
    let target = match payload {
        Payload::Route { from, to } => {
            if from != requester {
                warn!(
                    "Worker '{}' sent a connect request on behalf of '{}'",
                    requester, from
                );
            }
            to
        }
        _ => return Err(SupervisorError::MalformedRequest(requester.to_string())),
    };

    if target == requester {
        return Err(SupervisorError::SelfConnect(target));
    }

    let worker = registry
        .lookup(&target)
        .map_err(|_| SupervisorError::UnknownPeer(target.clone()))?;
    if !worker.is_connected() {
        return Err(SupervisorError::channel(&target, ChannelError::Closed));
    }

    let (near, far) = Channel::pair().map_err(|e| SupervisorError::channel(&target, e))?;
    debug!("Offering '{}' a channel from '{}'", target, requester);

    // The router is stalled until the target answers.
    let reply = match offer(&mut worker.channel, requester, &target, near, backlog).await {
        Ok(reply) => reply,
        Err(source) => {
            if source.is_closed() {
                worker.disconnect();
            }
            return Err(SupervisorError::channel(&target, source));
        }
    };

    match reply.command {
        Command::Ok => Ok((target, far)),
        _ => Err(SupervisorError::PeerRejected {
            reply: reply.reason().unwrap_or("error").to_string(),
            peer: target,
        }),
    }
}

/// Send the offer and wait for `ok` or `error`. Requests the target queued
/// before it saw the offer go to `backlog`; anything else is dropped the
/// way the router would drop it.
async fn offer(
    channel: &mut Channel,
    requester: &str,
    target: &str,
    end: Channel,
    backlog: &mut Backlog,
) -> std::result::Result<Message, ChannelError> {
    channel.send_with(&Message::connect_offer(requester), end).await?;
    loop {
        let envelope = channel.recv().await?;
        match envelope.message.command {
            Command::Ok | Command::Error => return Ok(envelope.message),
            Command::Connect | Command::Quit => {
                debug!(
                    "Holding '{}' from '{}' until the offer is answered",
                    envelope.message.command.as_str(),
                    target
                );
                backlog.push_back((target.to_string(), envelope));
            }
            ref other => {
                debug!("Ignoring unexpected '{}' from worker '{}'", other.as_str(), target);
            }
        }
    }
}
