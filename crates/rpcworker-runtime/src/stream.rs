//! Outbound path: one ordered queue onto the control-plane channel.

use bytes::Bytes;
use rpcworker_proto::Message;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::StreamError;

/// Sending half of the outbound queue.
///
/// Every clone feeds the same FIFO, which the worker loop drains onto the
/// transport, so messages leave in the order they were issued.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbox {
    /// Create an outbox and the receiver the worker loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message. Fails with the message when the loop is gone.
    pub fn send(&self, message: Message) -> Result<(), Message> {
        trace!(kind = %message.kind(), session = message.session(), "queue outbound");
        self.tx.send(message).map_err(|err| err.0)
    }

    pub fn send_chunk(&self, session: u64, data: Bytes) -> Result<(), StreamError> {
        self.send(Message::Chunk { session, data })
            .map_err(|_| StreamError::Disconnected(session))
    }

    pub fn send_choke(&self, session: u64) -> Result<(), StreamError> {
        self.send(Message::Choke { session })
            .map_err(|_| StreamError::Disconnected(session))
    }

    /// True once the worker loop has dropped the receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writable output of one session, handed to its handler.
#[derive(Debug)]
pub struct Stream {
    session: u64,
    outbox: Outbox,
    closed: bool,
}

impl Stream {
    pub fn new(session: u64, outbox: Outbox) -> Self {
        Self {
            session,
            outbox,
            closed: false,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a chunk of output.
    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed(self.session));
        }
        self.outbox.send_chunk(self.session, data.into())
    }

    /// Signal end of output. Further writes fail.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed(self.session));
        }
        self.closed = true;
        self.outbox.send_choke(self.session)
    }
}
