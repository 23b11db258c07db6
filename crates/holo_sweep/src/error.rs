use crate::config::ConfigError;
use crate::gate::GateClosed;
use crate::store::StoreError;

/// Errors that stop the sweep. Per-key failures never surface here; tasks log
/// and swallow them.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("client connect to {target} failed after {attempts} attempts: {last}")]
    ConnectExhausted {
        target: String,
        attempts: u32,
        #[source]
        last: StoreError,
    },
    #[error(transparent)]
    Gate(#[from] GateClosed),
}

impl SweepError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SweepError::Config(err) => err.exit_code(),
            SweepError::ConnectExhausted { .. } => 3,
            SweepError::Gate(_) => 4,
        }
    }
}
