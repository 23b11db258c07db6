// holo-sweep entry point.
//
// Parses the positional CLI, sets up logging, and runs the sweep coordinator
// until it is interrupted or runs out of connection retries.

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use holo_sweep::config::{self, ConfigError, RetryPolicy, SweepConfig, Verbosity};
use holo_sweep::store::{Credentials, StoreTarget};
use holo_sweep::{Coordinator, RespConnector, SweepError};

/// Continuously insert, then read-and-update, a fixed keyspace.
#[derive(Parser, Debug)]
#[command(
    name = "holo-sweep",
    override_usage = "holo-sweep NodeIP NodePort Namespace SetName BinName BinValueLength DebugLevel [Username Password]"
)]
struct Args {
    /// Seed node host or IP.
    node_ip: String,

    /// Seed node port.
    node_port: String,

    namespace: String,

    set_name: String,

    bin_name: String,

    /// Length of the random value written on every operation.
    bin_value_length: String,

    /// 0 = summaries only, 1 = log errors, 2 = log errors and per-key successes.
    debug_level: String,

    /// Enables an authenticated connection; requires a password.
    #[arg(requires = "password")]
    username: Option<String>,

    password: Option<String>,

    /// Keyspace size; ids 1..=keys are swept.
    #[arg(long, default_value_t = config::DEFAULT_KEY_COUNT)]
    keys: u64,

    /// Maximum outstanding key tasks.
    #[arg(long, default_value_t = config::DEFAULT_MAX_INFLIGHT)]
    max_inflight: usize,

    /// Pause between scheduling steps.
    #[arg(long, default_value = "500us")]
    pace: humantime::Duration,

    /// Timeout for each read and write.
    #[arg(long, default_value = "50ms")]
    op_timeout: humantime::Duration,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = config::DEFAULT_CONNECT_ATTEMPTS)]
    connect_attempts: u32,

    /// Pause after each failed connection attempt.
    #[arg(long, default_value = "100ms")]
    connect_backoff: humantime::Duration,

    /// Seed for generated values (0 picks fresh random values).
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Args {
    fn into_config(self) -> Result<SweepConfig, ConfigError> {
        let port = config::parse_port(&self.node_port)?;
        let bin_len = config::parse_bin_len(&self.bin_value_length)?;
        let target = StoreTarget {
            host: self.node_ip,
            port,
        };

        let mut cfg = SweepConfig::new(target, &self.namespace, &self.set_name, &self.bin_name);
        cfg.bin_len = bin_len;
        cfg.verbosity = Verbosity::from_level(&self.debug_level);
        cfg.credentials = match (self.username, self.password) {
            (Some(user), Some(password)) => Some(Credentials { user, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Usage(
                    "username and password must be given together".to_string(),
                ))
            }
        };
        cfg.key_count = self.keys;
        cfg.max_inflight = self.max_inflight;
        cfg.pace = self.pace.into();
        cfg.op_timeout = self.op_timeout.into();
        cfg.retry = RetryPolicy {
            max_attempts: self.connect_attempts,
            backoff: self.connect_backoff.into(),
        };
        cfg.seed = self.seed;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Exit code for a clap parse failure: 2 for bad values, 1 for bad usage.
fn parse_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::DisplayHelp
        | ErrorKind::DisplayVersion
        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
        ErrorKind::InvalidValue | ErrorKind::ValueValidation => 2,
        _ => 1,
    }
}

/// Default directives when `RUST_LOG` is unset.
fn default_filter(verbosity: Verbosity) -> &'static str {
    if verbosity.debug {
        "info,holo_sweep=debug"
    } else {
        "info"
    }
}

fn init_logging(verbosity: Verbosity) {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(verbosity).into()),
        )
        .init();
}

#[tokio::main]
/// Parse CLI args, initialize logging, and run the sweep.
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(parse_exit_code(err.kind()));
        }
    };
    init_logging(Verbosity::from_level(&args.debug_level));

    let cfg = match args.into_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(severity = "fatal", error = %err, "invalid arguments");
            return ExitCode::from(err.exit_code());
        }
    };

    tokio::select! {
        res = run(cfg) => match res {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(severity = "fatal", error = %format!("{err:#}"), "sweep stopped");
                let code = err
                    .downcast_ref::<SweepError>()
                    .map(SweepError::exit_code)
                    .unwrap_or(1);
                ExitCode::from(code)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, exiting without draining in-flight tasks");
            ExitCode::SUCCESS
        }
    }
}

async fn run(cfg: SweepConfig) -> anyhow::Result<()> {
    tracing::info!(
        target_addr = %cfg.target,
        namespace = %cfg.namespace,
        set = %cfg.set,
        bin = %cfg.bin_name,
        bin_len = cfg.bin_len,
        authenticated = cfg.credentials.is_some(),
        "configured sweep"
    );
    let coordinator = Coordinator::new(&cfg, RespConnector);
    coordinator
        .run()
        .await
        .with_context(|| format!("sweep against {}", cfg.target))
}
