use std::time::Duration;

use clap::Parser;
use rpcworker::runtime::{LivenessConfig, StartupError, WorkerConfig};

use crate::logging::{LogFormat, LogLevel};

/// Launch arguments passed by the control plane.
#[derive(Parser, Debug)]
#[command(name = "rpcworker", version, about = "Worker process for a control-plane RPC engine")]
pub struct WorkerArgs {
    /// Identity token announced in the handshake.
    #[arg(long, value_name = "ID", env = "RPCWORKER_UUID")]
    pub uuid: String,

    /// Name of the hosted application.
    #[arg(long, value_name = "NAME", env = "RPCWORKER_APP")]
    pub app: String,

    /// Control-plane socket path.
    #[arg(long, value_name = "PATH", env = "RPCWORKER_ENDPOINT")]
    pub endpoint: String,

    /// Interval between outbound heartbeats (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", default_value = "5s", value_parser = parse_duration)]
    pub heartbeat_interval: Duration,

    /// How long to wait for the control plane to answer a heartbeat.
    #[arg(long, value_name = "DURATION", default_value = "2s", value_parser = parse_duration)]
    pub disown_timeout: Duration,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}

impl WorkerArgs {
    pub fn into_config(self) -> Result<WorkerConfig, StartupError> {
        WorkerConfig::new(&self.uuid, &self.app, &self.endpoint)?.with_liveness(LivenessConfig {
            heartbeat_interval: self.heartbeat_interval,
            disown_timeout: self.disown_timeout,
        })
    }
}

/// Accepts `Ns`, `Nms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<WorkerArgs, clap::Error> {
        let mut argv = vec![
            "rpcworker",
            "--uuid",
            "w-1",
            "--app",
            "echo",
            "--endpoint",
            "/run/engine.sock",
        ];
        argv.extend_from_slice(extra);
        WorkerArgs::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_liveness_defaults() {
        let config = parse(&[]).unwrap().into_config().unwrap();
        assert_eq!(config.liveness, LivenessConfig::default());
        assert_eq!(config.app, "echo");
    }

    #[test]
    fn durations_accept_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration(" ").is_err());
    }

    #[test]
    fn liveness_overrides_parse() {
        let args = parse(&["--heartbeat-interval", "250ms", "--disown-timeout", "1s"]).unwrap();
        assert_eq!(args.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(args.disown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let err = WorkerArgs::try_parse_from(["rpcworker", "--uuid", "w-1", "--app", "echo"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn empty_uuid_is_a_startup_error() {
        let err = WorkerArgs::try_parse_from([
            "rpcworker",
            "--uuid",
            "",
            "--app",
            "echo",
            "--endpoint",
            "/run/engine.sock",
        ])
        .unwrap()
        .into_config()
        .unwrap_err();
        assert!(matches!(err, StartupError::MissingArgument("uuid")));
    }
}
