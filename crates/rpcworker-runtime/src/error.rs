use crate::sandbox::HandlerError;

/// Errors that stop a worker from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rpcworker_transport::TransportError),

    /// Protocol-level error on the outbound path.
    #[error("protocol error: {0}")]
    Proto(#[from] rpcworker_proto::ProtoError),

    /// Invalid startup configuration.
    #[error("startup error: {0}")]
    Startup(#[from] StartupError),

    /// I/O error on the control-plane channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration errors detected before the worker connects.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// A required launch argument is absent or empty.
    #[error("missing required argument --{0}")]
    MissingArgument(&'static str),

    /// The identity token is not acceptable.
    #[error("invalid worker identity: {0}")]
    InvalidIdentity(String),

    /// The endpoint address is not acceptable.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] rpcworker_transport::TransportError),

    /// A liveness interval is zero.
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Errors delivering inbound data to a session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session id is already open.
    #[error("session {0} is already open")]
    Duplicate(u64),

    /// The handler dropped its request handle.
    #[error("request for session {0} was dropped by its handler")]
    RequestDropped(u64),
}

/// Errors writing handler output.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was already closed with a choke.
    #[error("stream for session {0} is closed")]
    Closed(u64),

    /// The worker loop has shut down.
    #[error("worker disconnected, session {0} cannot write")]
    Disconnected(u64),
}

/// Errors raised while locating or starting a handler.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// No handler is registered for the event.
    #[error("no handler registered for event '{0}'")]
    UnknownEvent(String),

    /// The handler failed while starting.
    #[error("handler for event '{event}' failed: {source}")]
    Handler {
        event: String,
        #[source]
        source: HandlerError,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;
