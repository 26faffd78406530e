use std::fmt;

use rpcworker::runtime::{Shutdown, StartupError, WorkerError};
use rpcworker::transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn startup_error(err: StartupError) -> CliError {
    CliError::new(USAGE, err.to_string())
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::EmptyEndpoint | TransportError::PathTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn worker_error(context: &str, err: WorkerError) -> CliError {
    match err {
        WorkerError::Transport(err) => transport_error(context, err),
        WorkerError::Startup(err) => CliError::new(USAGE, format!("{context}: {err}")),
        WorkerError::Io(err) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Process exit code for a clean stop.
pub fn shutdown_code(shutdown: &Shutdown) -> i32 {
    match shutdown {
        Shutdown::Terminated { .. } | Shutdown::Requested { .. } => SUCCESS,
        Shutdown::Disowned | Shutdown::Disconnected => FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_reasons_map_to_codes() {
        assert_eq!(
            shutdown_code(&Shutdown::Terminated {
                reason: 1,
                message: String::new()
            }),
            SUCCESS
        );
        assert_eq!(shutdown_code(&Shutdown::Disowned), FAILURE);
        assert_eq!(shutdown_code(&Shutdown::Disconnected), FAILURE);
    }

    #[test]
    fn connect_failure_is_transport_error() {
        let err = WorkerError::Transport(TransportError::Connect {
            path: "/tmp/missing.sock".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(worker_error("connect failed", err).code, TRANSPORT_ERROR);
        assert_eq!(
            startup_error(StartupError::MissingArgument("endpoint")).code,
            USAGE
        );
    }
}
