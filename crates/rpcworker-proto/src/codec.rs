use bytes::{Buf, BufMut, BytesMut};
use rmp::Marker;

use crate::error::{ProtoError, Result};
use crate::message::Message;

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────────┬──────────────┬──────────────────┐
/// │ array header │ kind (uint)    │ session      │ kind-specific    │
/// │ (fixarray)   │                │ (uint64)     │ fields           │
/// └──────────────┴────────────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let mut writer = dst.writer();
    rmp_serde::encode::write(&mut writer, message)?;
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, and on [`ProtoError::is_recoverable`] errors, consumes the
/// frame bytes from the buffer. Other errors leave the buffer untouched.
pub fn decode_message(src: &mut BytesMut, max_frame: usize) -> Result<Option<Message>> {
    let Some(len) = frame_len(src, max_frame)? else {
        return Ok(None); // Need more data
    };

    let frame = src.split_to(len).freeze();
    let mut slice = frame.as_ref();
    let value = rmpv::decode::read_value(&mut slice).map_err(|err| ProtoError::Malformed {
        kind: "message",
        reason: err.to_string(),
    })?;

    Message::from_value(value).map(Some)
}

/// Length of the first complete MessagePack value in `buf`.
///
/// Walks markers and skips payloads without allocating. Returns `Ok(None)`
/// while the value is still incomplete.
pub fn frame_len(buf: &[u8], max_frame: usize) -> Result<Option<usize>> {
    let mut pos = 0usize;
    let mut pending: u64 = 1;

    while pending > 0 {
        let Some((skip, children)) = read_header(buf, &mut pos)? else {
            return Ok(None);
        };
        pending = (pending - 1).saturating_add(children);
        pos = pos.saturating_add(skip);

        if pos > max_frame {
            return Err(ProtoError::FrameTooLarge {
                size: pos,
                max: max_frame,
            });
        }
    }

    if pos > buf.len() {
        return Ok(None); // Need more data
    }
    Ok(Some(pos))
}

/// Swallows one oversized frame, however it is split across reads.
///
/// Starts at the first byte of the frame and walks the same value headers as
/// [`frame_len`], dropping them and their payloads as they arrive.
#[derive(Debug, Clone)]
pub(crate) struct FrameDiscard {
    skip: usize,
    pending: u64,
    dropped: usize,
}

impl FrameDiscard {
    pub(crate) fn new() -> Self {
        Self {
            skip: 0,
            pending: 1,
            dropped: 0,
        }
    }

    /// Drop frame bytes from the front of `buf`. Returns `true` once the
    /// whole frame is gone; bytes after it are left in place.
    pub(crate) fn advance(&mut self, buf: &mut BytesMut) -> Result<bool> {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(buf.len());
                buf.advance(n);
                self.skip -= n;
                self.dropped += n;
                if self.skip > 0 {
                    return Ok(false);
                }
            }
            if self.pending == 0 {
                tracing::debug!(dropped = self.dropped, "oversized frame discarded");
                return Ok(true);
            }

            let mut pos = 0usize;
            let Some((skip, children)) = read_header(buf, &mut pos)? else {
                return Ok(false);
            };
            buf.advance(pos);
            self.dropped += pos;
            self.pending = (self.pending - 1).saturating_add(children);
            self.skip = skip;
        }
    }
}

/// Parse one value header at `pos`: the payload bytes that follow it and the
/// number of nested values. `Ok(None)` if the header itself is incomplete.
fn read_header(buf: &[u8], pos: &mut usize) -> Result<Option<(usize, u64)>> {
    let Some(&byte) = buf.get(*pos) else {
        return Ok(None);
    };
    let start = *pos;
    *pos += 1;

    let header = match Marker::from_u8(byte) {
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Some((0, 0))
        }
        Marker::U8 | Marker::I8 => Some((1, 0)),
        Marker::U16 | Marker::I16 => Some((2, 0)),
        Marker::U32 | Marker::I32 | Marker::F32 => Some((4, 0)),
        Marker::U64 | Marker::I64 | Marker::F64 => Some((8, 0)),
        Marker::FixStr(len) => Some((usize::from(len), 0)),
        Marker::Str8 | Marker::Bin8 => read_len(buf, pos, 1).map(|len| (len, 0)),
        Marker::Str16 | Marker::Bin16 => read_len(buf, pos, 2).map(|len| (len, 0)),
        Marker::Str32 | Marker::Bin32 => read_len(buf, pos, 4).map(|len| (len, 0)),
        Marker::FixArray(len) => Some((0, u64::from(len))),
        Marker::Array16 => read_len(buf, pos, 2).map(|len| (0, len as u64)),
        Marker::Array32 => read_len(buf, pos, 4).map(|len| (0, len as u64)),
        Marker::FixMap(len) => Some((0, 2 * u64::from(len))),
        Marker::Map16 => read_len(buf, pos, 2).map(|len| (0, 2 * len as u64)),
        Marker::Map32 => read_len(buf, pos, 4).map(|len| (0, 2 * len as u64)),
        // Ext payloads carry one extra type byte.
        Marker::FixExt1 => Some((2, 0)),
        Marker::FixExt2 => Some((3, 0)),
        Marker::FixExt4 => Some((5, 0)),
        Marker::FixExt8 => Some((9, 0)),
        Marker::FixExt16 => Some((17, 0)),
        Marker::Ext8 => read_len(buf, pos, 1).map(|len| (len + 1, 0)),
        Marker::Ext16 => read_len(buf, pos, 2).map(|len| (len + 1, 0)),
        Marker::Ext32 => read_len(buf, pos, 4).map(|len| (len + 1, 0)),
        Marker::Reserved => {
            return Err(ProtoError::InvalidEncoding(format!(
                "reserved marker 0x{byte:02x} at offset {start}"
            )))
        }
    };
    Ok(header)
}

fn read_len(buf: &[u8], pos: &mut usize, width: usize) -> Option<usize> {
    let mut field = buf.get(*pos..*pos + width)?;
    *pos += width;
    let len = match width {
        1 => usize::from(field.get_u8()),
        2 => usize::from(field.get_u16()),
        _ => field.get_u32() as usize,
    };
    Some(len)
}

/// `tokio_util` codec for the worker protocol.
///
/// Decoding drops malformed, unknown-kind and oversized frames and keeps
/// going, the same way [`crate::Decoder`] does.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame: usize,
    discard: Option<FrameDiscard>,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            discard: None,
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl tokio_util::codec::Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        loop {
            if let Some(discard) = &mut self.discard {
                if !discard.advance(src)? {
                    return Ok(None);
                }
                self.discard = None;
            }

            match decode_message(src, self.max_frame) {
                Err(err) if err.is_recoverable() => {
                    tracing::debug!(error = %err, "dropping frame");
                }
                Err(err @ ProtoError::FrameTooLarge { .. }) => {
                    tracing::warn!(error = %err, "dropping oversized frame");
                    self.discard = Some(FrameDiscard::new());
                }
                other => return other,
            }
        }
    }
}

impl tokio_util::codec::Encoder<Message> for MessageCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        encode_message(&item, dst)
    }
}
