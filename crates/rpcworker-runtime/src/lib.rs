//! Runtime half of an rpcworker process.
//!
//! A worker connects to its control plane, announces itself with a handshake,
//! multiplexes invocation sessions over the single channel and keeps a
//! heartbeat running so that an unresponsive control plane makes the worker
//! exit on its own.
//!
//! - [`Dispatcher`] is the protocol state machine. It is driven by decoded
//!   messages and timer fires and never touches I/O, so it can be tested with
//!   synthetic input.
//! - [`Worker`] is the reactor: one `tokio::select!` loop that owns the
//!   transport, both timers and the outbound queue.
//! - [`Sandbox`] is the seam to application code; [`HandlerRegistry`] is the
//!   stock implementation.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod liveness;
pub mod sandbox;
pub mod session;
pub mod stream;
pub mod worker;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, Shutdown};
pub use error::{Result, SandboxError, SessionError, StartupError, StreamError, WorkerError};
pub use identity::WorkerIdentity;
pub use liveness::{Liveness, LivenessConfig};
pub use sandbox::{Handler, HandlerError, HandlerRegistry, Sandbox};
pub use session::{Request, RequestError, RequestEvent, RequestSink, SessionTable};
pub use stream::{Outbox, Stream};
pub use worker::{Worker, WorkerHandle};
