//! The scheduling loop.
//!
//! One coordinator future runs every step in order: make sure the connection
//! is live, take a gate slot (this is where backpressure bites), advance the
//! cursor and close the phase on wrap, spawn the key task, then pause.

use std::sync::Arc;
use std::time::Duration;

use crate::accountant::{CycleAccountant, Phase, PhaseSummary};
use crate::config::SweepConfig;
use crate::connection::ConnectionManager;
use crate::error::SweepError;
use crate::gate::ConcurrencyGate;
use crate::payload::{RandomLetters, ValueGenerator};
use crate::store::Connector;
use crate::tally::{success_tally, TallySink};
use crate::task::{KeyTask, TaskSettings};

/// What one coordinator step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub id: u64,
    pub phase: Phase,
    /// Set when this step crossed a phase boundary.
    pub summary: Option<PhaseSummary>,
}

/// Drives the sweep against stores reached through `C`.
pub struct Coordinator<C: Connector> {
    connections: ConnectionManager<C>,
    gate: ConcurrencyGate,
    accountant: CycleAccountant,
    sink: TallySink,
    settings: Arc<TaskSettings>,
    values: Arc<dyn ValueGenerator>,
    pace: Duration,
}

impl<C: Connector> Coordinator<C> {
    pub fn new(config: &SweepConfig, connector: C) -> Self {
        let values: Arc<dyn ValueGenerator> = if config.seed == 0 {
            Arc::new(RandomLetters::new())
        } else {
            Arc::new(RandomLetters::seeded(config.seed))
        };
        Self::with_values(config, connector, values)
    }

    pub fn with_values(
        config: &SweepConfig,
        connector: C,
        values: Arc<dyn ValueGenerator>,
    ) -> Self {
        let connections = ConnectionManager::new(
            connector,
            config.target.clone(),
            config.client_policy(),
            config.retry,
        );
        let gate = ConcurrencyGate::new(config.max_inflight);
        // Room for a whole sweep plus whatever was still in flight at the
        // previous boundary.
        let tally_capacity = usize::try_from(config.key_count)
            .unwrap_or(usize::MAX)
            .saturating_add(gate.capacity());
        let (sink, tally) = success_tally(tally_capacity);
        Self {
            connections,
            gate,
            accountant: CycleAccountant::new(config.key_count, tally),
            sink,
            settings: Arc::new(TaskSettings::from(config)),
            values,
            pace: config.pace,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn phase(&self) -> Phase {
        self.accountant.phase()
    }

    pub fn connections(&self) -> &ConnectionManager<C> {
        &self.connections
    }

    /// Run one scheduling step.
    pub async fn step(&mut self) -> Result<StepReport, SweepError> {
        let conn = self.connections.ensure_connected().await?;
        let slot = self.gate.acquire().await?;

        let advance = self.accountant.advance();
        let summary = if advance.wrapped {
            Some(self.accountant.close_phase(&self.gate).await)
        } else {
            None
        };

        let phase = self.accountant.phase();
        let task = KeyTask {
            id: advance.id,
            phase,
            conn,
            sink: self.sink.clone(),
            settings: self.settings.clone(),
            values: self.values.clone(),
            slot,
        };
        tokio::spawn(task.run());

        if !self.pace.is_zero() {
            tokio::time::sleep(self.pace).await;
        }
        Ok(StepReport {
            id: advance.id,
            phase,
            summary,
        })
    }

    /// Step forever. Only returns when connection retries are exhausted.
    pub async fn run(mut self) -> Result<(), SweepError> {
        tracing::info!(
            keys = self.accountant.key_count(),
            capacity = self.gate.capacity(),
            "starting sweep"
        );
        loop {
            self.step().await?;
        }
    }
}
