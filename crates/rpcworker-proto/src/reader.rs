use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_message, DEFAULT_MAX_FRAME};
use crate::error::{ProtoError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Blocking message reader over a byte stream.
///
/// Unlike [`crate::Decoder`], malformed frames are reported to the caller.
/// The offending frame is consumed, so the next call starts after it.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    max_frame: usize,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_frame(inner, DEFAULT_MAX_FRAME)
    }

    /// Frames whose encoding grows past `max_frame` bytes are rejected.
    pub fn with_max_frame(inner: T, max_frame: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame,
        }
    }

    /// Block until one whole message is buffered. EOF before that is
    /// [`ProtoError::ConnectionClosed`].
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.max_frame)? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            };

            if read == 0 {
                return Err(ProtoError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
