use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use tranche_core::DEFAULT_MAX_FRAME_BYTES;

/// Runtime configuration for the `tranche-master` binary.
///
/// These settings control where the worker list comes from, how long the
/// master waits on worker sockets, and how the request listener behaves. All
/// values are parsed from CLI arguments or environment variables (a `.env`
/// file is honored), with defaults that match the reference deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tranche-master",
    version,
    about = "Fans jobs out to workers and hands each one a disjoint ticket block"
)]
pub struct CliArgs {
    /// Path to the JSON worker list: `[{"addr": "host:port", "cors": 1}, ...]`.
    ///
    /// Environment variable: `WORKERS_CONFIG`
    #[arg(long, env = "WORKERS_CONFIG", default_value = "config.json")]
    pub workers_config: PathBuf,

    /// Address the request listener binds to.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,

    /// Upper bound, in seconds, for the initial connection to each worker.
    ///
    /// A worker that cannot be reached in time stays registered without a
    /// connection.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SECS`
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 300)]
    pub connect_timeout_secs: u64,

    /// Deadline, in seconds, for writing one dispatch message to a worker.
    ///
    /// Environment variable: `DISPATCH_TIMEOUT_SECS`
    #[arg(long, env = "DISPATCH_TIMEOUT_SECS", default_value_t = 30)]
    pub dispatch_timeout_secs: u64,

    /// Deadline, in seconds, for delivering the cancel signal to one worker.
    ///
    /// Environment variable: `CANCEL_TIMEOUT_SECS`
    #[arg(long, env = "CANCEL_TIMEOUT_SECS", default_value_t = 10)]
    pub cancel_timeout_secs: u64,

    /// First ticket handed out by this master.
    ///
    /// Offsetting the counter lets several masters share one identifier space
    /// as long as their ranges never meet.
    ///
    /// Environment variable: `COUNTER_START`
    #[arg(long, env = "COUNTER_START", default_value_t = 0)]
    pub counter_start: u64,

    /// Largest request or worker frame accepted, in bytes.
    ///
    /// Environment variable: `MAX_FRAME_BYTES`
    #[arg(long, env = "MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Capacity of the per-session channel carrying dispatch outcomes back to
    /// the caller.
    ///
    /// Environment variable: `EVENT_BUFFER_SIZE`
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value_t = 64)]
    pub event_buffer_size: usize,

    /// Seconds to wait for open sessions to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 3)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workers_config: PathBuf,
    pub server_addr: String,
    pub connect_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub cancel_timeout: Duration,
    pub counter_start: u64,
    pub max_frame_bytes: usize,
    pub event_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers_config: PathBuf::from("config.json"),
            server_addr: String::from("0.0.0.0:3000"),
            connect_timeout: Duration::from_secs(300),
            dispatch_timeout: Duration::from_secs(30),
            cancel_timeout: Duration::from_secs(10),
            counter_start: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            event_buffer_size: 64,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        for (name, secs) in [
            ("CONNECT_TIMEOUT_SECS", args.connect_timeout_secs),
            ("DISPATCH_TIMEOUT_SECS", args.dispatch_timeout_secs),
            ("CANCEL_TIMEOUT_SECS", args.cancel_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        if args.max_frame_bytes == 0 {
            bail!("MAX_FRAME_BYTES must be greater than 0");
        }

        if args.event_buffer_size == 0 {
            bail!("EVENT_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            workers_config: args.workers_config,
            server_addr: args.server_addr,
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            dispatch_timeout: Duration::from_secs(args.dispatch_timeout_secs),
            cancel_timeout: Duration::from_secs(args.cancel_timeout_secs),
            counter_start: args.counter_start,
            max_frame_bytes: args.max_frame_bytes,
            event_buffer_size: args.event_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("tranche-master").chain(args.iter().copied());
        let args = CliArgs::try_parse_from(argv)?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:3000");
        assert_eq!(config.connect_timeout, Duration::from_secs(300));
        assert_eq!(config.cancel_timeout, Duration::from_secs(10));
        assert_eq!(config.counter_start, 0);
        assert_eq!(config.workers_config, PathBuf::from("config.json"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--server-addr",
            "127.0.0.1:4000",
            "--counter-start",
            "500",
            "--cancel-timeout-secs",
            "2",
        ])
        .unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:4000");
        assert_eq!(config.counter_start, 500);
        assert_eq!(config.cancel_timeout, Duration::from_secs(2));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = parse(&["--dispatch-timeout-secs", "0"]).unwrap_err();
        assert!(err.to_string().contains("DISPATCH_TIMEOUT_SECS"));
    }

    #[test]
    fn zero_frame_limit_is_rejected() {
        assert!(parse(&["--max-frame-bytes", "0"]).is_err());
    }
}
