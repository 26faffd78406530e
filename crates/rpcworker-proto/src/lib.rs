//! Worker RPC protocol: message model and framing.
//!
//! Every message on the control-plane channel is one MessagePack array:
//!
//! ```text
//! [kind, session, ...kind-specific fields]
//! ```
//!
//! There is no length prefix. Frame boundaries are the boundaries of the
//! top-level MessagePack value, so the decoder buffers partial values across
//! reads and hands out complete [`Message`]s only.

pub mod codec;
pub mod decoder;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_message, encode_message, frame_len, MessageCodec, DEFAULT_MAX_FRAME};
pub use decoder::Decoder;
pub use error::{ProtoError, Result};
pub use message::{Kind, Message, CONNECTION_SESSION, TERMINATE_ABNORMAL, TERMINATE_NORMAL};
pub use reader::MessageReader;
pub use writer::MessageWriter;
