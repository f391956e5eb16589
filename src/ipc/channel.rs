use super::protocol::{Message, MessageFrame, MAX_FRAME_LEN};
use super::sys;
use crate::error::ChannelError;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::UnixStream;
use tracing::trace;

/// A received frame plus the channel end that travelled with it, if any.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    pub attachment: Option<Channel>,
}

/// One end of a duplex, message-oriented conduit between two processes.
#[derive(Debug)]
pub struct Channel {
    stream: UnixStream,
}

impl Channel {
    /// Create a connected pair of channel ends.
    pub fn pair() -> Result<(Channel, Channel), ChannelError> {
        let (left, right) = UnixStream::pair()?;
        Ok((Channel { stream: left }, Channel { stream: right }))
    }

    /// Adopt the supervisor channel a worker process inherits at
    /// [`WORKER_CHANNEL_FD`](super::WORKER_CHANNEL_FD).
    ///
    /// Must be called at most once per process.
    pub fn from_inherited() -> Result<Channel, ChannelError> {
        Self::from_owned(sys::inherited_channel()?)
    }

    fn from_owned(fd: OwnedFd) -> Result<Channel, ChannelError> {
        let stream = std::os::unix::net::UnixStream::from(fd);
        stream.set_nonblocking(true)?;
        Ok(Channel {
            stream: UnixStream::from_std(stream)?,
        })
    }

    /// Non-blocking check for a pending frame. End of stream also counts as
    /// pending so the following [`recv`](Self::recv) can report it.
    pub fn poll(&self) -> Result<bool, ChannelError> {
        Ok(sys::peek_pending(self.stream.as_raw_fd())?)
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        self.transmit(message, None).await
    }

    /// Send `message` with `attachment` riding along. The local copy of the
    /// attached end is closed once the peer holds its own.
    pub async fn send_with(&mut self, message: &Message, attachment: Channel) -> Result<(), ChannelError> {
        self.transmit(message, Some(attachment)).await
    }

    async fn transmit(&mut self, message: &Message, attachment: Option<Channel>) -> Result<(), ChannelError> {
        let frame = MessageFrame::encode(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
        if frame.len() - 4 > MAX_FRAME_LEN {
            return Err(ChannelError::FrameTooLarge(frame.len() - 4));
        }

        let socket = self.stream.as_raw_fd();
        let attached: Option<RawFd> = attachment.as_ref().map(|c| c.stream.as_raw_fd());
        let sent = self
            .stream
            .async_io(Interest::WRITABLE, || sys::send_with_fd(socket, &frame, attached))
            .await
            .map_err(ChannelError::from_stream)?;

        if sent < frame.len() {
            self.stream
                .write_all(&frame[sent..])
                .await
                .map_err(ChannelError::from_stream)?;
        }
        trace!(
            command = message.command.as_str(),
            bytes = frame.len(),
            attached = attached.is_some(),
            "Frame sent"
        );

        drop(attachment);
        Ok(())
    }

    /// Blocking receive of the next frame.
    pub async fn recv(&mut self) -> Result<Envelope, ChannelError> {
        let socket = self.stream.as_raw_fd();
        let mut header = [0u8; 4];
        let mut filled = 0;
        let mut attachment = None;

        // The descriptor, if any, is queued with the first bytes of the frame.
        while filled < header.len() {
            let (n, fd) = self
                .stream
                .async_io(Interest::READABLE, || sys::recv_with_fd(socket, &mut header[filled..]))
                .await
                .map_err(ChannelError::from_stream)?;
            if n == 0 {
                return Err(ChannelError::Closed);
            }
            filled += n;
            if let Some(fd) = fd {
                attachment = Some(Channel::from_owned(fd)?);
            }
        }

        let len = MessageFrame::read_length(&header);
        if len > MAX_FRAME_LEN {
            return Err(ChannelError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(ChannelError::from_stream)?;

        let message = MessageFrame::decode(&body).map_err(|e| ChannelError::Decode(e.to_string()))?;
        trace!(
            command = message.command.as_str(),
            bytes = len + 4,
            attached = attachment.is_some(),
            "Frame received"
        );

        Ok(Envelope { message, attachment })
    }
}

impl AsRawFd for Channel {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
impl Channel {
    /// Write bytes to the stream without framing them.
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(ChannelError::from_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{Command, Payload};
    use std::time::Duration;

    async fn wait_pending(channel: &Channel) {
        for _ in 0..200 {
            if channel.poll().unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no frame became pending");
    }

    #[tokio::test]
    async fn test_send_and_recv() {
        let (mut left, mut right) = Channel::pair().unwrap();

        left.send(&Message::alive()).await.unwrap();
        let envelope = right.recv().await.unwrap();

        assert_eq!(envelope.message, Message::alive());
        assert!(envelope.attachment.is_none());
    }

    #[tokio::test]
    async fn test_poll_does_not_consume() {
        let (mut left, mut right) = Channel::pair().unwrap();
        assert!(!right.poll().unwrap());

        left.send(&Message::custom("chatter", Payload::Text("hi".into())))
            .await
            .unwrap();
        wait_pending(&right).await;
        assert!(right.poll().unwrap());

        let envelope = right.recv().await.unwrap();
        assert_eq!(envelope.message.command, Command::Custom("chatter".into()));
        assert!(!right.poll().unwrap());
    }

    #[tokio::test]
    async fn test_attached_channel_reaches_peer() {
        let (mut supervisor, mut worker) = Channel::pair().unwrap();
        let (mut near, far) = Channel::pair().unwrap();

        supervisor
            .send_with(&Message::connect_offer("io_manager"), far)
            .await
            .unwrap();

        let envelope = worker.recv().await.unwrap();
        assert_eq!(envelope.message.payload, Payload::Peer("io_manager".into()));
        let mut far = envelope.attachment.expect("offer carries a channel end");

        near.send(&Message::custom("ping", Payload::Empty)).await.unwrap();
        let ping = far.recv().await.unwrap();
        assert_eq!(ping.message.command, Command::Custom("ping".into()));

        far.send(&Message::ok()).await.unwrap();
        assert_eq!(near.recv().await.unwrap().message, Message::ok());
    }

    #[tokio::test]
    async fn test_back_to_back_frames_keep_attachments_apart() {
        let (mut left, mut right) = Channel::pair().unwrap();
        let (_kept, carried) = Channel::pair().unwrap();

        left.send(&Message::init()).await.unwrap();
        left.send_with(&Message::ok(), carried).await.unwrap();
        left.send(&Message::quit()).await.unwrap();

        let first = right.recv().await.unwrap();
        let second = right.recv().await.unwrap();
        let third = right.recv().await.unwrap();

        assert!(first.attachment.is_none());
        assert_eq!(second.message, Message::ok());
        assert!(second.attachment.is_some());
        assert_eq!(third.message, Message::quit());
        assert!(third.attachment.is_none());
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (left, mut right) = Channel::pair().unwrap();
        drop(left);

        assert!(right.poll().unwrap());
        assert!(right.recv().await.unwrap_err().is_closed());
    }
}
