use std::fmt;

use bytes::Bytes;
use rmpv::Value;
use serde::{Serialize, Serializer};

use crate::error::{ProtoError, Result};

/// Session id reserved for connection-level messages (handshake, heartbeat, terminate).
pub const CONNECTION_SESSION: u64 = 0;

/// TERMINATE reason: orderly shutdown.
pub const TERMINATE_NORMAL: u32 = 1;
/// TERMINATE reason: shutdown caused by a failure.
pub const TERMINATE_ABNORMAL: u32 = 2;

/// RPC operation codes.
///
/// The numeric values are a deployment-wide contract with the control plane
/// and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Handshake = 0,
    Heartbeat = 1,
    Terminate = 2,
    Invoke = 3,
    Chunk = 4,
    Error = 5,
    Choke = 6,
}

impl Kind {
    /// Map a wire code to a kind.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Kind::Handshake),
            1 => Some(Kind::Heartbeat),
            2 => Some(Kind::Terminate),
            3 => Some(Kind::Invoke),
            4 => Some(Kind::Chunk),
            5 => Some(Kind::Error),
            6 => Some(Kind::Choke),
            _ => None,
        }
    }

    /// The wire code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Handshake => "handshake",
            Kind::Heartbeat => "heartbeat",
            Kind::Terminate => "terminate",
            Kind::Invoke => "invoke",
            Kind::Chunk => "chunk",
            Kind::Error => "error",
            Kind::Choke => "choke",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One RPC message exchanged with the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First message a worker sends, announcing its identity.
    Handshake { identity: String },
    /// Liveness probe, sent in both directions.
    Heartbeat,
    /// Whole-worker shutdown with a reason code.
    Terminate { reason: u32, message: String },
    /// Opens `session` and routes it to the handler registered for `event`.
    Invoke { session: u64, event: String },
    /// A piece of session payload.
    Chunk { session: u64, data: Bytes },
    /// Application-level failure of a session.
    Error {
        session: u64,
        code: u32,
        message: String,
    },
    /// End of input for a session.
    Choke { session: u64 },
}

impl Message {
    pub fn handshake(identity: impl Into<String>) -> Self {
        Message::Handshake {
            identity: identity.into(),
        }
    }

    pub fn terminate(reason: u32, message: impl Into<String>) -> Self {
        Message::Terminate {
            reason,
            message: message.into(),
        }
    }

    pub fn invoke(session: u64, event: impl Into<String>) -> Self {
        Message::Invoke {
            session,
            event: event.into(),
        }
    }

    pub fn chunk(session: u64, data: impl Into<Bytes>) -> Self {
        Message::Chunk {
            session,
            data: data.into(),
        }
    }

    pub fn error(session: u64, code: u32, message: impl Into<String>) -> Self {
        Message::Error {
            session,
            code,
            message: message.into(),
        }
    }

    pub fn choke(session: u64) -> Self {
        Message::Choke { session }
    }

    /// The operation this message carries.
    pub fn kind(&self) -> Kind {
        match self {
            Message::Handshake { .. } => Kind::Handshake,
            Message::Heartbeat => Kind::Heartbeat,
            Message::Terminate { .. } => Kind::Terminate,
            Message::Invoke { .. } => Kind::Invoke,
            Message::Chunk { .. } => Kind::Chunk,
            Message::Error { .. } => Kind::Error,
            Message::Choke { .. } => Kind::Choke,
        }
    }

    /// The session this message belongs to; [`CONNECTION_SESSION`] for
    /// connection-level messages.
    pub fn session(&self) -> u64 {
        match self {
            Message::Handshake { .. } | Message::Heartbeat | Message::Terminate { .. } => {
                CONNECTION_SESSION
            }
            Message::Invoke { session, .. }
            | Message::Chunk { session, .. }
            | Message::Error { session, .. }
            | Message::Choke { session } => *session,
        }
    }

    /// Interpret a decoded MessagePack value as a message.
    ///
    /// Trailing fields beyond the ones a kind defines are ignored.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut items = match value {
            Value::Array(items) => items.into_iter(),
            other => {
                return Err(malformed(
                    "message",
                    format!("frame is not an array: {other}"),
                ))
            }
        };

        let code = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| malformed("message", "missing kind code"))?;
        let session = items
            .next()
            .and_then(|v| v.as_u64())
            .ok_or_else(|| malformed("message", "missing session id"))?;
        let kind = Kind::from_code(code).ok_or(ProtoError::UnknownKind { code, session })?;

        let mut fields = Fields { kind, items };
        let message = match kind {
            Kind::Handshake => Message::Handshake {
                identity: fields.string("identity")?,
            },
            Kind::Heartbeat => Message::Heartbeat,
            Kind::Terminate => Message::Terminate {
                reason: fields.uint32("reason")?,
                message: fields.string("message")?,
            },
            Kind::Invoke => Message::Invoke {
                session,
                event: fields.string("event")?,
            },
            Kind::Chunk => Message::Chunk {
                session,
                data: fields.bytes("data")?,
            },
            Kind::Error => Message::Error {
                session,
                code: fields.uint32("code")?,
                message: fields.string("message")?,
            },
            Kind::Choke => Message::Choke { session },
        };
        Ok(message)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let kind = self.kind().code();
        let session = self.session();
        match self {
            Message::Handshake { identity } => (kind, session, identity).serialize(serializer),
            Message::Heartbeat | Message::Choke { .. } => (kind, session).serialize(serializer),
            Message::Terminate { reason, message } => {
                (kind, session, reason, message).serialize(serializer)
            }
            Message::Invoke { event, .. } => (kind, session, event).serialize(serializer),
            Message::Chunk { data, .. } => (kind, session, data).serialize(serializer),
            Message::Error { code, message, .. } => {
                (kind, session, code, message).serialize(serializer)
            }
        }
    }
}

struct Fields {
    kind: Kind,
    items: std::vec::IntoIter<Value>,
}

impl Fields {
    fn next(&mut self, field: &str) -> Result<Value> {
        self.items
            .next()
            .ok_or_else(|| malformed(self.kind.name(), format!("missing field `{field}`")))
    }

    fn string(&mut self, field: &str) -> Result<String> {
        match self.next(field)? {
            Value::String(text) => text
                .into_str()
                .ok_or_else(|| malformed(self.kind.name(), format!("`{field}` is not utf-8"))),
            other => Err(malformed(
                self.kind.name(),
                format!("`{field}` must be a string, got {other}"),
            )),
        }
    }

    fn uint32(&mut self, field: &str) -> Result<u32> {
        let value = self.next(field)?;
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                malformed(
                    self.kind.name(),
                    format!("`{field}` must be a 32-bit unsigned integer, got {value}"),
                )
            })
    }

    fn bytes(&mut self, field: &str) -> Result<Bytes> {
        match self.next(field)? {
            Value::Binary(data) => Ok(Bytes::from(data)),
            Value::String(text) => Ok(Bytes::from(text.into_bytes())),
            other => Err(malformed(
                self.kind.name(),
                format!("`{field}` must be binary, got {other}"),
            )),
        }
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> ProtoError {
    ProtoError::Malformed {
        kind,
        reason: reason.into(),
    }
}
