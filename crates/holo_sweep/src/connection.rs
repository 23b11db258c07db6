//! Keeps the single shared store connection alive.

use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::error::SweepError;
use crate::store::{ClientPolicy, Connector, StoreConnection, StoreError, StoreTarget};

/// Owns the shared connection handle. Only the coordinator drives it, so
/// `ensure_connected` takes `&mut self` and never races with itself.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    target: StoreTarget,
    policy: ClientPolicy,
    retry: RetryPolicy,
    conn: Option<Arc<C::Conn>>,
    connects: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        target: StoreTarget,
        policy: ClientPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            target,
            policy,
            retry,
            conn: None,
            connects: 0,
        }
    }

    /// The current handle if it is still live.
    pub fn current(&self) -> Option<Arc<C::Conn>> {
        self.conn.as_ref().filter(|conn| conn.is_connected()).cloned()
    }

    /// Successful connects so far (1 + reconnects).
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Return the live connection, reconnecting with bounded retry if needed.
    pub async fn ensure_connected(&mut self) -> Result<Arc<C::Conn>, SweepError> {
        if let Some(conn) = self.current() {
            return Ok(conn);
        }
        // Drop the dead handle first so at most one connection is live.
        self.conn = None;

        let mut last = None;
        for attempt in 1..=self.retry.max_attempts {
            tracing::info!(target_addr = %self.target, attempt, "connecting to cluster");
            match self.connector.connect(&self.target, &self.policy).await {
                Ok(conn) => {
                    tracing::info!(target_addr = %self.target, attempt, "client connected");
                    let conn = Arc::new(conn);
                    self.conn = Some(conn.clone());
                    self.connects += 1;
                    return Ok(conn);
                }
                Err(err) => {
                    tracing::error!(
                        target_addr = %self.target,
                        attempt,
                        error = %err,
                        "client connect failed"
                    );
                    last = Some(err);
                    tokio::time::sleep(self.retry.backoff).await;
                }
            }
        }

        Err(SweepError::ConnectExhausted {
            target: self.target.to_string(),
            attempts: self.retry.max_attempts,
            last: last.unwrap_or(StoreError::Disconnected),
        })
    }
}
