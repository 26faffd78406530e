use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Address of the control-plane channel, fixed for the life of the worker.
///
/// Today this is always a filesystem-path Unix domain socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    pub const MAX_PATH_LEN: usize = 104;

    /// Build an endpoint from a socket path, validating its length.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let len = path.as_os_str().len();
        if len == 0 {
            return Err(TransportError::EmptyEndpoint);
        }
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(Self { path })
    }

    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect to the control plane.
    #[cfg(unix)]
    pub async fn connect(&self) -> Result<tokio::net::UnixStream> {
        let stream = tokio::net::UnixStream::connect(&self.path)
            .await
            .map_err(|source| TransportError::Connect {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = ?self.path, "connected to control plane");
        Ok(stream)
    }

    /// Connect to the control plane.
    #[cfg(not(unix))]
    pub async fn connect(&self) -> Result<tokio::io::DuplexStream> {
        debug!(path = ?self.path, "unix endpoints unavailable on this platform");
        Err(TransportError::Connect {
            path: self.path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "rpcworker endpoints require Unix domain sockets",
            ),
        })
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
