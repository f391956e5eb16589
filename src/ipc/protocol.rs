//! Control protocol types using rkyv for zero-copy serialization
//!
//! Every frame is a `(command, payload)` pair. Channel ends never appear in
//! the archived bytes; they travel next to the frame as ancillary data.

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Command tag of a control message
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub enum Command {
    /// Enter the subsystem run loop
    Init,
    /// Liveness probe, answered with `Alive`
    Alive,
    /// Release resources and exit
    Quit,
    /// Ask for, or offer, a direct line to another worker
    Connect,
    /// Positive reply
    Ok,
    /// Negative reply
    Error,
    /// Drop the link the message arrived on
    Close,
    /// Subsystem-defined command exchanged between workers
    Custom(String),
}

impl Command {
    /// Get the wire name of the command
    pub fn as_str(&self) -> &str {
        match self {
            Command::Init => "init",
            Command::Alive => "alive",
            Command::Quit => "quit",
            Command::Connect => "connect",
            Command::Ok => "ok",
            Command::Error => "error",
            Command::Close => "close",
            Command::Custom(name) => name.as_str(),
        }
    }
}

/// Opaque payload carried next to a command
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub enum Payload {
    Empty,
    /// Connect request: `from` wants a line to `to`
    Route { from: String, to: String },
    /// Connect offer: the named peer holds the other end of the attached channel
    Peer(String),
    /// Error detail
    Reason(String),
    Text(String),
}

/// Tagged control message sent over a channel
#[derive(Archive, Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct Message {
    pub command: Command,
    pub payload: Payload,
}

impl Message {
    pub fn new(command: Command, payload: Payload) -> Self {
        Self { command, payload }
    }

    pub fn init() -> Self {
        Self::new(Command::Init, Payload::Empty)
    }

    pub fn alive() -> Self {
        Self::new(Command::Alive, Payload::Empty)
    }

    pub fn quit() -> Self {
        Self::new(Command::Quit, Payload::Empty)
    }

    pub fn close() -> Self {
        Self::new(Command::Close, Payload::Empty)
    }

    pub fn ok() -> Self {
        Self::new(Command::Ok, Payload::Empty)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Command::Error, Payload::Reason(reason.into()))
    }

    /// Worker to supervisor: open a line from `from` to `to`
    pub fn connect_request(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            Command::Connect,
            Payload::Route {
                from: from.into(),
                to: to.into(),
            },
        )
    }

    /// Supervisor to target: `peer` holds the other end of the attached channel
    pub fn connect_offer(peer: impl Into<String>) -> Self {
        Self::new(Command::Connect, Payload::Peer(peer.into()))
    }

    pub fn custom(name: impl Into<String>, payload: Payload) -> Self {
        Self::new(Command::Custom(name.into()), payload)
    }

    /// Error detail if this is an error reply
    pub fn reason(&self) -> Option<&str> {
        match &self.payload {
            Payload::Reason(reason) => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// Message frame for wire protocol
///
/// Format: [4-byte length (little-endian)][rkyv bytes]
pub struct MessageFrame;

impl MessageFrame {
    /// Encode a message to bytes with length prefix
    pub fn encode(message: &Message) -> Result<Vec<u8>, rkyv::rancor::Error> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)?;
        let len = bytes.len() as u32;
        let mut result = Vec::with_capacity(4 + bytes.len());
        result.extend_from_slice(&len.to_le_bytes());
        result.extend_from_slice(&bytes);
        Ok(result)
    }

    /// Decode a frame body (without the length prefix)
    pub fn decode(body: &[u8]) -> Result<Message, rkyv::rancor::Error> {
        let mut aligned = AlignedVec::<16>::with_capacity(body.len());
        aligned.extend_from_slice(body);
        rkyv::from_bytes::<Message, rkyv::rancor::Error>(&aligned)
    }

    /// Read length prefix from buffer
    pub fn read_length(buf: &[u8; 4]) -> usize {
        u32::from_le_bytes(*buf) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_frame() {
        let message = Message::connect_request("io_manager", "database");
        let frame = MessageFrame::encode(&message).unwrap();

        let len = MessageFrame::read_length(&frame[..4].try_into().unwrap());
        assert_eq!(len, frame.len() - 4);

        let decoded = MessageFrame::decode(&frame[4..]).unwrap();
        assert_eq!(decoded.command, Command::Connect);
        assert_eq!(
            decoded.payload,
            Payload::Route {
                from: "io_manager".to_string(),
                to: "database".to_string(),
            }
        );
    }

    #[test]
    fn test_archived_access() {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&Message::alive()).unwrap();
        let archived = rkyv::access::<ArchivedMessage, rkyv::rancor::Error>(&bytes).unwrap();
        assert!(matches!(archived.command, ArchivedCommand::Alive));
        assert!(matches!(archived.payload, ArchivedPayload::Empty));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(MessageFrame::decode(&[0xff, 0x01, 0x02]).is_err());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Connect.as_str(), "connect");
        assert_eq!(Command::Custom("get_setting".into()).as_str(), "get_setting");
    }

    #[test]
    fn test_error_reason() {
        assert_eq!(Message::error("unknown peer").reason(), Some("unknown peer"));
        assert_eq!(Message::ok().reason(), None);
    }
}
