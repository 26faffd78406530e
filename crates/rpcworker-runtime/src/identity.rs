use std::fmt;
use std::str::FromStr;

use crate::error::StartupError;

const MAX_IDENTITY_LEN: usize = 128;

/// Opaque token the control plane assigns to a worker at spawn time.
///
/// Sent once, in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    pub fn new(token: impl Into<String>) -> Result<Self, StartupError> {
        let token = token.into();
        if token.is_empty() {
            return Err(StartupError::MissingArgument("uuid"));
        }
        if token.len() > MAX_IDENTITY_LEN {
            return Err(StartupError::InvalidIdentity(format!(
                "{} bytes exceeds maximum {MAX_IDENTITY_LEN}",
                token.len()
            )));
        }
        if token.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(StartupError::InvalidIdentity(
                "must not contain whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WorkerIdentity {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
