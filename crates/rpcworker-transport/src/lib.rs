//! Local transport to the control plane.
//!
//! The control plane hands every worker an endpoint address on its command
//! line. This crate turns that address into an [`Endpoint`] and connects it
//! into an ordered, bidirectional byte stream. Everything above this layer
//! only sees `AsyncRead + AsyncWrite`.

pub mod endpoint;
pub mod error;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
