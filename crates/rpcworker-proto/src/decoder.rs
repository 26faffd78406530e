use std::ops::ControlFlow;

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::codec::{decode_message, FrameDiscard, DEFAULT_MAX_FRAME};
use crate::error::ProtoError;
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Incremental decoder for one connection.
///
/// Byte chunks of any size go in; complete messages come out in order.
/// Incomplete frames stay buffered until the next [`Decoder::feed`].
///
/// Frames that decode as MessagePack but not as a known message are dropped
/// silently. Frames over the size limit are skipped whole, including the part
/// that has not arrived yet. Bytes that are not MessagePack at all cannot be
/// resynchronized, so the whole residual buffer is discarded.
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame: usize,
    discard: Option<FrameDiscard>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame,
            discard: None,
        }
    }

    /// Append `chunk` and deliver every complete message to `on_message`.
    ///
    /// Each message is handed over before the next one is scanned. Scanning
    /// stops as soon as `on_message` breaks; whatever follows stays buffered.
    pub fn feed<B>(
        &mut self,
        chunk: &[u8],
        mut on_message: impl FnMut(Message) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        self.buf.extend_from_slice(chunk);
        while let Some(message) = self.next_message() {
            if let ControlFlow::Break(stop) = on_message(message) {
                return ControlFlow::Break(stop);
            }
        }
        ControlFlow::Continue(())
    }

    /// Pop the next complete message from the residual buffer.
    pub fn next_message(&mut self) -> Option<Message> {
        loop {
            if let Some(discard) = &mut self.discard {
                match discard.advance(&mut self.buf) {
                    Ok(true) => self.discard = None,
                    Ok(false) => return None,
                    Err(err) => {
                        self.discard_all(&err);
                        return None;
                    }
                }
            }

            match decode_message(&mut self.buf, self.max_frame) {
                Ok(message) => return message,
                Err(err) if err.is_recoverable() => {
                    debug!(error = %err, "dropping frame");
                }
                Err(err @ ProtoError::FrameTooLarge { .. }) => {
                    warn!(error = %err, "dropping oversized frame");
                    self.discard = Some(FrameDiscard::new());
                }
                Err(err) => {
                    self.discard_all(&err);
                    return None;
                }
            }
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Forget any buffered bytes, e.g. before reusing the decoder on a new connection.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discard = None;
    }

    fn discard_all(&mut self, err: &ProtoError) {
        warn!(error = %err, dropped = self.buf.len(), "discarding undecodable input");
        self.buf.clear();
        self.discard = None;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
