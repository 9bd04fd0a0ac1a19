//! Configuration for the benchmark harness.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Command-line arguments for the benchmark harness.
#[derive(Parser, Debug, Default)]
#[command(name = "echo-bench")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo benchmark comparing connection-handling strategies", long_about = None)]
pub struct CliArgs {
    /// Address of the load generator host
    pub loader_ip: Option<String>,

    /// Number of connections under test
    pub count: Option<usize>,

    /// Comma-separated backend names, or '*' for all
    pub tests: Option<String>,

    /// Path to TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Load generator control port
    #[arg(short = 'p', long)]
    pub loader_port: Option<u16>,

    /// Local port the echo server binds to
    #[arg(short = 'b', long)]
    pub bind_port: Option<u16>,

    /// Local address the echo server binds to
    #[arg(short = 'i', long)]
    pub bind_ip: Option<String>,

    /// Rounds to run per selected backend
    #[arg(short = 'r', long)]
    pub rounds: Option<u32>,

    /// Message size in bytes (one frame)
    #[arg(short = 's', long)]
    pub msize: Option<usize>,

    /// Extra key=value pairs recorded in the report
    #[arg(short = 'm', long, num_args = 0..)]
    pub meta: Vec<String>,

    /// Measured test duration in seconds, enforced by the load generator
    #[arg(long)]
    pub runtime: Option<u64>,

    /// Fixed per-message delay in ms on the load generator side
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Lower bound of the randomized per-message delay range in ms
    #[arg(long)]
    pub min_timeout: Option<u64>,

    /// Upper bound of the randomized per-message delay range in ms
    #[arg(long)]
    pub max_timeout: Option<u64>,

    /// Shared library with native backend entry points
    #[arg(long)]
    pub native_lib: Option<PathBuf>,

    /// Print the registered backend names and exit
    #[arg(long)]
    pub list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub test: TestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load generator endpoint configuration.
#[derive(Debug, Deserialize)]
pub struct LoaderConfig {
    pub ip: Option<String>,
    #[serde(default = "default_loader_port")]
    pub port: u16,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: default_loader_port(),
        }
    }
}

/// Local bind endpoint configuration.
#[derive(Debug, Deserialize)]
pub struct BindConfig {
    #[serde(default = "default_bind_ip")]
    pub ip: String,
    #[serde(default = "default_bind_port")]
    pub port: u16,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            ip: default_bind_ip(),
            port: default_bind_port(),
        }
    }
}

/// Test shape configuration.
#[derive(Debug, Deserialize)]
pub struct TestConfig {
    #[serde(default = "default_msize")]
    pub msize: usize,
    #[serde(default = "default_runtime")]
    pub runtime: u64,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            msize: default_msize(),
            runtime: default_runtime(),
            rounds: default_rounds(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_loader_port() -> u16 {
    33331
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    33332
}

fn default_msize() -> usize {
    1024
}

fn default_runtime() -> u64 {
    30
}

fn default_rounds() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Immutable parameters of one test round.
#[derive(Debug, Clone)]
pub struct TestParams {
    /// Control-channel endpoint of the load generator.
    pub loader_addr: SocketAddr,
    /// Address the echo server binds to.
    pub bind_addr: SocketAddr,
    /// Number of connections under test.
    pub count: usize,
    /// Frame size in bytes.
    pub msize: usize,
    /// Measured test duration in seconds (enforced by the load generator).
    pub runtime_secs: u64,
    /// Per-message delay range in ms `(min, max)` applied by the load
    /// generator; `(0, 0)` means full speed.
    pub timeout_ms: (u64, u64),
}

/// Which backends a run selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// `*`: every registered backend.
    All,
    /// Explicit comma-separated names.
    Named(Vec<String>),
}

/// Final resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub params: TestParams,
    pub tests: TestSelection,
    pub rounds: u32,
    pub meta: Vec<(String, String)>,
    pub native_lib: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Resolve CLI args over an optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let loader_ip = cli
            .loader_ip
            .or(toml_config.loader.ip)
            .ok_or(ConfigError::Missing("loader address"))?;
        let count = cli.count.ok_or(ConfigError::Missing("connection count"))?;
        let tests = cli.tests.ok_or(ConfigError::Missing("test selection"))?;

        let loader_port = cli.loader_port.unwrap_or(toml_config.loader.port);
        let bind_ip = cli.bind_ip.unwrap_or(toml_config.bind.ip);
        let bind_port = cli.bind_port.unwrap_or(toml_config.bind.port);

        let loader_addr = resolve(&loader_ip, loader_port)?;
        let bind_addr = resolve(&bind_ip, bind_port)?;

        let timeout_ms = resolve_timeout(cli.timeout, cli.min_timeout, cli.max_timeout)?;

        let tests = if tests == "*" {
            TestSelection::All
        } else {
            TestSelection::Named(tests.split(',').map(str::to_string).collect())
        };

        let mut meta = Vec::with_capacity(cli.meta.len());
        for entry in cli.meta {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::BadMeta(entry.clone()))?;
            meta.push((key.to_string(), value.to_string()));
        }

        Ok(Config {
            params: TestParams {
                loader_addr,
                bind_addr,
                count,
                msize: cli.msize.unwrap_or(toml_config.test.msize),
                runtime_secs: cli.runtime.unwrap_or(toml_config.test.runtime),
                timeout_ms,
            },
            tests,
            rounds: cli.rounds.unwrap_or(toml_config.test.rounds),
            meta,
            native_lib: cli.native_lib,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ConfigError::Resolve(format!("{host}:{port}"), e))?
        .next()
        .ok_or_else(|| ConfigError::NoAddress(format!("{host}:{port}")))
}

fn resolve_timeout(
    fixed: Option<u64>,
    min: Option<u64>,
    max: Option<u64>,
) -> Result<(u64, u64), ConfigError> {
    if fixed.is_some() && (min.is_some() || max.is_some()) {
        return Err(ConfigError::TimeoutConflict);
    }
    if min.is_some() != max.is_some() {
        return Err(ConfigError::TimeoutRangeIncomplete);
    }
    match (fixed, min, max) {
        (Some(t), _, _) => Ok((t, t)),
        (None, Some(lo), Some(hi)) => {
            if hi < lo {
                Err(ConfigError::TimeoutRangeInverted(lo, hi))
            } else {
                Ok((lo, hi))
            }
        }
        _ => Ok((0, 0)),
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Missing(&'static str),
    Resolve(String, std::io::Error),
    NoAddress(String),
    TimeoutConflict,
    TimeoutRangeIncomplete,
    TimeoutRangeInverted(u64, u64),
    BadMeta(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Missing(what) => write!(f, "Missing required {what}"),
            ConfigError::Resolve(addr, e) => write!(f, "Failed to resolve '{addr}': {e}"),
            ConfigError::NoAddress(addr) => write!(f, "'{addr}' resolved to no address"),
            ConfigError::TimeoutConflict => {
                write!(f, "--timeout conflicts with --min-timeout/--max-timeout")
            }
            ConfigError::TimeoutRangeIncomplete => {
                write!(f, "--max-timeout requires --min-timeout and vice versa")
            }
            ConfigError::TimeoutRangeInverted(lo, hi) => {
                write!(f, "--max-timeout ({hi}) should be >= --min-timeout ({lo})")
            }
            ConfigError::BadMeta(entry) => {
                write!(f, "meta entry '{entry}' is not of the form key=value")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> CliArgs {
        CliArgs {
            loader_ip: Some("127.0.0.1".to_string()),
            count: Some(100),
            tests: Some("*".to_string()),
            log_level: "info".to_string(),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::load(base_cli()).unwrap();
        assert_eq!(config.params.loader_addr.port(), 33331);
        assert_eq!(config.params.bind_addr.port(), 33332);
        assert_eq!(config.params.msize, 1024);
        assert_eq!(config.params.runtime_secs, 30);
        assert_eq!(config.params.timeout_ms, (0, 0));
        assert_eq!(config.rounds, 1);
        assert_eq!(config.tests, TestSelection::All);
    }

    #[test]
    fn test_named_selection_and_meta() {
        let mut cli = base_cli();
        cli.tests = Some("threads,selector".to_string());
        cli.meta = vec!["kernel=6.8".to_string()];
        let config = Config::load(cli).unwrap();
        assert_eq!(
            config.tests,
            TestSelection::Named(vec!["threads".to_string(), "selector".to_string()])
        );
        assert_eq!(config.meta, vec![("kernel".to_string(), "6.8".to_string())]);
    }

    #[test]
    fn test_fixed_timeout_expands_to_range() {
        let mut cli = base_cli();
        cli.timeout = Some(5);
        let config = Config::load(cli).unwrap();
        assert_eq!(config.params.timeout_ms, (5, 5));
    }

    #[test]
    fn test_timeout_conflicts() {
        let mut cli = base_cli();
        cli.timeout = Some(5);
        cli.min_timeout = Some(1);
        cli.max_timeout = Some(2);
        assert!(matches!(
            Config::load(cli).unwrap_err(),
            ConfigError::TimeoutConflict
        ));

        let mut cli = base_cli();
        cli.min_timeout = Some(1);
        assert!(matches!(
            Config::load(cli).unwrap_err(),
            ConfigError::TimeoutRangeIncomplete
        ));

        let mut cli = base_cli();
        cli.min_timeout = Some(5);
        cli.max_timeout = Some(2);
        assert!(matches!(
            Config::load(cli).unwrap_err(),
            ConfigError::TimeoutRangeInverted(5, 2)
        ));
    }

    #[test]
    fn test_bad_meta_rejected() {
        let mut cli = base_cli();
        cli.meta = vec!["no-equals-sign".to_string()];
        assert!(matches!(
            Config::load(cli).unwrap_err(),
            ConfigError::BadMeta(_)
        ));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [loader]
            ip = "10.0.0.4"
            port = 4000

            [bind]
            ip = "127.0.0.1"
            port = 4001

            [test]
            msize = 256
            runtime = 10
            rounds = 3

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.loader.ip.as_deref(), Some("10.0.0.4"));
        assert_eq!(config.loader.port, 4000);
        assert_eq!(config.bind.port, 4001);
        assert_eq!(config.test.msize, 256);
        assert_eq!(config.test.rounds, 3);
        assert_eq!(config.logging.level, "debug");
    }
}
