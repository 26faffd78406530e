/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The bytes are not valid MessagePack; the stream cannot be resynchronized.
    #[error("invalid msgpack encoding: {0}")]
    InvalidEncoding(String),

    /// A complete frame was read but does not describe a valid message.
    #[error("malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// A complete frame carries a kind code this worker does not know.
    #[error("unknown message kind {code} (session {session})")]
    UnknownKind { code: u64, session: u64 },

    /// A frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Encoding a message failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// An I/O error occurred while reading or writing messages.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl ProtoError {
    /// True for errors that consumed exactly one frame and leave the stream usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtoError::Malformed { .. } | ProtoError::UnknownKind { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;
