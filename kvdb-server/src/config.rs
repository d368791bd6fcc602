//! Server configuration and CLI argument parsing.
//!
//! All arguments can also be set via environment variables with the
//! `KVDB_` prefix; CLI arguments take precedence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

/// Resolved server configuration, built from [`Args`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub map_file: PathBuf,
    pub initial_segment_len: u64,
    pub lock_timeout: Duration,
    pub receive_timeout: Duration,
    pub report_interval: Duration,
    pub log_level: String,
}

/// Command-line arguments for `kvdb-server`.
#[derive(Parser, Debug)]
#[command(
    name = "kvdb-server",
    about = "Networked key-value store server",
    long_about = "Serves INSERT/UPDATE/GET/DELETE requests against a persistent, mmap-backed key-value map.\n\nEnvironment variables with a KVDB_ prefix are supported; CLI arguments take precedence."
)]
pub struct Args {
    #[arg(long, value_name = "HOST", help = "Address to bind to", default_value = "127.0.0.1", env = "KVDB_HOST")]
    pub host: String,

    #[arg(long, value_name = "PORT", help = "Port to listen on", default_value_t = 1524, env = "KVDB_PORT")]
    pub port: u16,

    #[arg(long, value_name = "PATH", help = "Path to the memory-mapped storage file", default_value = "./memfile.map", env = "KVDB_MAP_FILE")]
    pub map_file: PathBuf,

    #[arg(
        long,
        value_name = "BYTES",
        help = "Initial size in bytes of a newly created storage file",
        default_value_t = 5 * 1024 * 1024,
        env = "KVDB_INITIAL_SEGMENT_LEN"
    )]
    pub initial_segment_len: u64,

    #[arg(long, value_name = "MS", help = "Map lock acquisition timeout, in milliseconds", default_value_t = 500, env = "KVDB_LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: u64,

    #[arg(long, value_name = "MS", help = "Frame payload receive timeout, in milliseconds", default_value_t = 1000, env = "KVDB_RECEIVE_TIMEOUT_MS")]
    pub receive_timeout_ms: u64,

    #[arg(long, value_name = "SECS", help = "Interval between performance reports", default_value_t = 60, env = "KVDB_REPORT_INTERVAL_SECS")]
    pub report_interval_secs: u64,

    #[arg(long, value_name = "LEVEL", help = "Log level: error, warn, info, debug, trace", default_value = "info", env = "KVDB_LOG_LEVEL")]
    pub log_level: String,

    #[arg(long, help = "List all environment variables and exit", action = clap::ArgAction::SetTrue)]
    pub list_env_vars: bool,
}

impl Config {
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        let config = Config {
            host: args.host,
            port: args.port,
            map_file: args.map_file,
            initial_segment_len: args.initial_segment_len,
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
            receive_timeout: Duration::from_millis(args.receive_timeout_ms),
            report_interval: Duration::from_secs(args.report_interval_secs),
            log_level: args.log_level,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port must be nonzero"));
        }
        if self.initial_segment_len == 0 {
            return Err(anyhow!("initial segment length must be nonzero"));
        }
        Ok(())
    }

    fn print_env_vars() {
        println!("KVDB_HOST                 - bind address (default: 127.0.0.1)");
        println!("KVDB_PORT                 - listen port (default: 1524)");
        println!("KVDB_MAP_FILE             - path to storage file (default: ./memfile.map)");
        println!("KVDB_INITIAL_SEGMENT_LEN  - initial storage file size in bytes (default: 5242880)");
        println!("KVDB_LOCK_TIMEOUT_MS      - map lock timeout in ms (default: 500)");
        println!("KVDB_RECEIVE_TIMEOUT_MS   - frame payload timeout in ms (default: 1000)");
        println!("KVDB_REPORT_INTERVAL_SECS - performance report interval in seconds (default: 60)");
        println!("KVDB_LOG_LEVEL            - log level (default: info)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 1524,
            map_file: PathBuf::from("./memfile.map"),
            initial_segment_len: 1024,
            lock_timeout: Duration::from_millis(500),
            receive_timeout: Duration::from_millis(1000),
            report_interval: Duration::from_secs(60),
            log_level: "info".into(),
        }
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = base_config();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_segment_len() {
        let mut cfg = base_config();
        cfg.initial_segment_len = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }
}
