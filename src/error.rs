use std::path::PathBuf;
use thiserror::Error;

/// Failures on a single channel end.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed by peer")]
    Closed,

    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
}

impl ChannelError {
    /// Map an I/O error from a stream operation, folding hang-ups into `Closed`.
    pub(crate) fn from_stream(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
                ChannelError::Closed
            }
            _ => ChannelError::Io(err),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }

    /// Whether the stream is still aligned on a frame boundary. Only a body
    /// that was read in full but failed to decode leaves it usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Decode(_))
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to start worker '{name}': {source}")]
    StartupFailure {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("worker '{0}' is not registered")]
    NotFound(String),

    #[error("unknown peer '{0}'")]
    UnknownPeer(String),

    #[error("peer '{peer}' rejected the connection: {reply}")]
    PeerRejected { peer: String, reply: String },

    #[error("worker '{0}' cannot connect to itself")]
    SelfConnect(String),

    #[error("malformed connect request from '{0}'")]
    MalformedRequest(String),

    #[error("channel to '{name}' failed: {source}")]
    Channel {
        name: String,
        #[source]
        source: ChannelError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl SupervisorError {
    pub(crate) fn channel(name: &str, source: ChannelError) -> Self {
        SupervisorError::Channel {
            name: name.to_string(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failures inside a worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("link '{link}' failed: {source}")]
    Link {
        link: String,
        #[source]
        source: ChannelError,
    },

    #[error("no link named '{0}'")]
    NoSuchLink(String),

    #[error("connection to '{peer}' refused: {reason}")]
    Refused { peer: String, reason: String },

    #[error("quit requested by supervisor")]
    QuitRequested,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("{0}")]
    Subsystem(String),
}

impl WorkerError {
    pub(crate) fn link(name: &str, source: ChannelError) -> Self {
        WorkerError::Link {
            link: name.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
