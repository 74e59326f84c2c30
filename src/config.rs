use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Parser)]
#[command(
    name = "tcping",
    version,
    about = "Continuously probe a TCP endpoint, optionally emulating an application handshake",
    after_help = "Protocols: basic, FiveM, MCv1, MCv2, SSH, HTTP (case-insensitive).\nPress CTRL+C to stop and print statistics."
)]
pub struct Cli {
    /// Target IP address or hostname
    pub target: String,

    /// Target port (1-65535)
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Protocol to emulate after connecting (default: basic)
    pub protocol: Option<String>,

    /// Resolve the target to an IP address and print it before probing
    #[arg(short, long)]
    pub resolve: bool,

    /// Attempt timeout in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Delay between attempts in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub interval: Option<u64>,

    /// JSON config file
    #[arg(short, long, env = "TCPING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_name = "ADDR")]
    pub metrics: Option<SocketAddr>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub enable_latency_history: bool,
}

fn default_interval_ms() -> u64 {
    1500
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            attempt_timeout_ms: default_timeout_ms(),
            handshake_timeout_ms: default_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            log_level: default_log_level(),
            enable_latency_history: false,
        }
    }
}

impl ProbeConfig {
    /// Builds the effective configuration: the config file if one was
    /// given, then command-line overrides on top.
    pub async fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load_file_config(path).await?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    async fn load_file_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path.display()));
        }

        let content = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading {}", file_path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing {}", file_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(timeout) = cli.timeout {
            self.attempt_timeout_ms = timeout;
        }
        if let Some(interval) = cli.interval {
            self.interval_ms = interval;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("attempt timeout must be greater than 0ms");
        }
        if self.handshake_timeout_ms == 0 {
            anyhow::bail!("handshake timeout must be greater than 0ms");
        }
        if self.debounce_ms == 0 {
            anyhow::bail!("debounce window must be greater than 0ms");
        }
        self.validate_log_level()
    }

    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!(
                "Invalid log level: {}. Valid levels are: trace, debug, info, warn, error",
                self.log_level
            )),
        }
    }

    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }

    pub fn timings(&self) -> Timings {
        Timings {
            interval: Duration::from_millis(self.interval_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

/// Durations that drive a probing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Pause after an attempt terminates before the next one starts.
    pub interval: Duration,
    /// Absolute budget for connect plus handshake, measured from attempt start.
    pub attempt_timeout: Duration,
    /// How long a handshake waits for its first byte, measured from connect.
    pub handshake_timeout: Duration,
    /// Quiet period that marks a streamed response as complete.
    pub debounce: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        ProbeConfig::default().timings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tcping").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_documented_constants() {
        let timings = Timings::default();
        assert_eq!(timings.interval, Duration::from_millis(1500));
        assert_eq!(timings.attempt_timeout, Duration::from_millis(5000));
        assert_eq!(timings.handshake_timeout, Duration::from_millis(5000));
        assert_eq!(timings.debounce, Duration::from_millis(500));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ProbeConfig::from_json(r#"{"debounce_ms": 250, "log_level": "debug"}"#).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.interval_ms, 1500);
        assert_eq!(config.attempt_timeout_ms, 5000);
        assert_eq!(config.get_tracing_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn cli_overrides_file_values() {
        let cli = parse(&["10.0.0.1", "25565", "mcv2", "-t", "2000", "--interval", "300"]);
        let mut config = ProbeConfig::from_json(r#"{"attempt_timeout_ms": 9000}"#).unwrap();
        config.apply_cli(&cli);
        assert_eq!(config.attempt_timeout_ms, 2000);
        assert_eq!(config.interval_ms, 300);
        assert_eq!(cli.protocol.as_deref(), Some("mcv2"));
    }

    #[test]
    fn rejects_invalid_values() {
        let config = ProbeConfig {
            log_level: "loud".into(),
            ..ProbeConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ProbeConfig {
            attempt_timeout_ms: 0,
            ..ProbeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_must_be_in_range() {
        let args = |port: &'static str| ["tcping", "127.0.0.1", port];
        assert!(Cli::try_parse_from(args("0")).is_err());
        assert!(Cli::try_parse_from(args("65536")).is_err());
        assert!(Cli::try_parse_from(args("http")).is_err());
        assert!(Cli::try_parse_from(args("65535")).is_ok());
    }

    #[test]
    fn missing_port_is_an_error() {
        assert!(Cli::try_parse_from(["tcping", "127.0.0.1"]).is_err());
    }

    #[test]
    fn resolve_flag() {
        let cli = parse(&["-r", "example.com", "22", "ssh"]);
        assert!(cli.resolve);
        assert_eq!(cli.port, 22);
    }
}
