//! Runtime configuration.
//!
//! `SweepConfig` is built once at startup and shared read-only by the
//! coordinator, the connection manager and every task.

use std::time::Duration;

use crate::store::{Bin, ClientPolicy, Credentials, Key, StoreTarget};

/// Keys swept per phase.
pub const DEFAULT_KEY_COUNT: u64 = 10_000;
/// Gate capacity (max outstanding tasks).
pub const DEFAULT_MAX_INFLIGHT: usize = 1_000;
/// Pause between coordinator iterations.
pub const DEFAULT_PACE: Duration = Duration::from_micros(500);
/// Timeout applied to each read and write.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Invalid startup input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} incorrect: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{0}")]
    Usage(String),
}

impl ConfigError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConfigError::Usage(_) => 1,
            ConfigError::InvalidNumber { .. } => 2,
        }
    }
}

/// How chatty per-key logging is. Phase summaries are always logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verbosity {
    pub errors: bool,
    pub debug: bool,
}

impl Verbosity {
    /// `2` logs errors and per-key successes, `1` logs errors, anything else
    /// only summaries.
    pub fn from_level(level: &str) -> Self {
        match level.trim() {
            "2" => Self {
                errors: true,
                debug: true,
            },
            "1" => Self {
                errors: true,
                debug: false,
            },
            _ => Self::default(),
        }
    }
}

/// Bounded retry for establishing a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            backoff: DEFAULT_CONNECT_BACKOFF,
        }
    }
}

/// Everything the sweep needs, validated once before scheduling starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepConfig {
    pub target: StoreTarget,
    pub namespace: String,
    pub set: String,
    pub bin_name: String,
    pub bin_len: usize,
    pub verbosity: Verbosity,
    pub credentials: Option<Credentials>,
    pub key_count: u64,
    pub max_inflight: usize,
    pub pace: Duration,
    pub op_timeout: Duration,
    pub retry: RetryPolicy,
    /// Non-zero seeds make generated values reproducible.
    pub seed: u64,
}

impl SweepConfig {
    /// Config with the fixed defaults for everything but the required fields.
    pub fn new(target: StoreTarget, namespace: &str, set: &str, bin_name: &str) -> Self {
        Self {
            target,
            namespace: namespace.to_string(),
            set: set.to_string(),
            bin_name: bin_name.to_string(),
            bin_len: 16,
            verbosity: Verbosity::default(),
            credentials: None,
            key_count: DEFAULT_KEY_COUNT,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            pace: DEFAULT_PACE,
            op_timeout: DEFAULT_OP_TIMEOUT,
            retry: RetryPolicy::default(),
            seed: 0,
        }
    }

    pub fn client_policy(&self) -> ClientPolicy {
        match &self.credentials {
            Some(credentials) => ClientPolicy::authenticated(credentials.clone()),
            None => ClientPolicy::anonymous(),
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_count == 0 {
            return Err(ConfigError::InvalidNumber {
                field: "keys",
                value: "0".to_string(),
            });
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::InvalidNumber {
                field: "max-inflight",
                value: self.max_inflight.to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                field: "connect-attempts",
                value: "0".to_string(),
            });
        }
        // Same checks every task applies to its key and bin.
        Key::new(&self.namespace, &self.set, 1)
            .map_err(|err| ConfigError::Usage(err.to_string()))?;
        Bin::new(&self.bin_name, String::new())
            .map_err(|err| ConfigError::Usage(err.to_string()))?;
        Ok(())
    }
}

/// Parse the port argument.
pub fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidNumber {
            field: "Port number",
            value: raw.to_string(),
        })
}

/// Parse the bin value length argument.
pub fn parse_bin_len(raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidNumber {
            field: "binValueLength",
            value: raw.to_string(),
        })
}
