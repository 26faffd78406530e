use rpcworker_proto::DEFAULT_MAX_FRAME;
use rpcworker_transport::Endpoint;

use crate::error::StartupError;
use crate::identity::WorkerIdentity;
use crate::liveness::LivenessConfig;

/// Everything a worker needs from its launch arguments.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity token announced in the handshake.
    pub identity: WorkerIdentity,
    /// Name of the application this worker hosts.
    pub app: String,
    /// Control-plane channel address.
    pub endpoint: Endpoint,
    /// Heartbeat and disown timings.
    pub liveness: LivenessConfig,
    /// Largest inbound frame accepted. Default: 16 MiB.
    pub max_frame_size: usize,
}

impl WorkerConfig {
    /// Validate the three required launch values.
    ///
    /// An empty value counts as missing.
    pub fn new(uuid: &str, app: &str, endpoint: &str) -> Result<Self, StartupError> {
        let identity = WorkerIdentity::new(uuid)?;
        if app.is_empty() {
            return Err(StartupError::MissingArgument("app"));
        }
        if endpoint.is_empty() {
            return Err(StartupError::MissingArgument("endpoint"));
        }
        let endpoint = Endpoint::new(endpoint)?;

        Ok(Self {
            identity,
            app: app.to_string(),
            endpoint,
            liveness: LivenessConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME,
        })
    }

    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Result<Self, StartupError> {
        liveness.validate()?;
        self.liveness = liveness;
        Ok(self)
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}
