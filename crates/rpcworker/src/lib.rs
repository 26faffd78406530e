//! Worker-process runtime for a control-plane RPC protocol.
//!
//! A worker is launched by a control plane with an identity, an application
//! name and the address of a local stream socket. It connects, announces
//! itself, serves invocation sessions multiplexed over the connection and
//! exits when the control plane asks it to or stops answering heartbeats.
//!
//! # Crate Structure
//!
//! - [`transport`] - Endpoint validation and Unix socket connect
//! - [`proto`] - Message model and MessagePack framing
//! - [`runtime`] - Sessions, liveness, the dispatcher and the worker loop

/// Re-export transport types.
pub mod transport {
    pub use rpcworker_transport::*;
}

/// Re-export protocol types.
pub mod proto {
    pub use rpcworker_proto::*;
}

/// Re-export runtime types.
pub mod runtime {
    pub use rpcworker_runtime::*;
}
