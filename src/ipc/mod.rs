//! Channel pairs between the supervisor and its workers.
//!
//! A [`Channel`] is one end of an `AF_UNIX` stream socket pair. Frames carry a
//! [`Message`] and may carry another channel end as an attachment, which is how
//! the supervisor hands a private line to two workers.
//!
//! ```text
//!  supervisor ──(control)── worker A
//!      │
//!      └──────(control)── worker B
//!
//!  after brokering:   worker A ══(P2 ↔ P1)══ worker B
//! ```

pub mod channel;
pub mod protocol;
mod sys;

pub use channel::{Channel, Envelope};
pub use protocol::{Command, Message, MessageFrame, Payload};
pub use sys::WORKER_CHANNEL_FD;
pub(crate) use sys::prepare_worker;
