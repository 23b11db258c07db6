//! Cursor, phase and per-phase tally bookkeeping.
//!
//! The cursor walks `1..=key_count` forever. The step that pushes it past the
//! end wraps it back to 1 and is the only place a phase can end: the
//! coordinator then runs [`CycleAccountant::close_phase`], which waits for the
//! in-flight tasks to drain, counts the phase's successes and flips
//! Insert to Update the first time round.

use std::fmt;

use crate::gate::ConcurrencyGate;
use crate::tally::SuccessTally;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// First sweep: create-only writes.
    Insert,
    /// Every later sweep: read, then update-only write.
    Update,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Insert => f.write_str("insert"),
            Phase::Update => f.write_str("update"),
        }
    }
}

/// Result of advancing the cursor by one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advance {
    pub id: u64,
    pub wrapped: bool,
}

/// What the barrier observed when a phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub key_count: u64,
    pub capacity: usize,
    pub outstanding: usize,
    pub successes: u64,
}

/// Cursor and phase state; also owns the consumer side of the tally.
pub struct CycleAccountant {
    key_count: u64,
    cursor: u64,
    phase: Phase,
    tally: SuccessTally,
    completed_phases: u64,
}

impl CycleAccountant {
    pub fn new(key_count: u64, tally: SuccessTally) -> Self {
        Self {
            key_count: key_count.max(1),
            cursor: 0,
            phase: Phase::Insert,
            tally,
            completed_phases: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn key_count(&self) -> u64 {
        self.key_count
    }

    /// Last id handed out, 0 before the first advance.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn completed_phases(&self) -> u64 {
        self.completed_phases
    }

    /// Move to the next id, wrapping to 1 after `key_count`.
    pub fn advance(&mut self) -> Advance {
        self.cursor += 1;
        if self.cursor > self.key_count {
            self.cursor = 1;
            return Advance {
                id: self.cursor,
                wrapped: true,
            };
        }
        Advance {
            id: self.cursor,
            wrapped: false,
        }
    }

    /// Phase-boundary barrier.
    ///
    /// Waits until at most one slot is held (the one the coordinator already
    /// reserved for the next task), drains the tally, logs the summary and
    /// moves to [`Phase::Update`].
    pub async fn close_phase(&mut self, gate: &ConcurrencyGate) -> PhaseSummary {
        gate.wait_for_outstanding_at_most(1).await;
        let successes = self.tally.drain();
        let summary = PhaseSummary {
            phase: self.phase,
            key_count: self.key_count,
            capacity: gate.capacity(),
            outstanding: gate.outstanding(),
            successes,
        };
        match summary.phase {
            Phase::Insert => tracing::info!(
                keys = summary.key_count,
                capacity = summary.capacity,
                outstanding = summary.outstanding,
                success_count = summary.successes,
                "insert phase complete"
            ),
            Phase::Update => tracing::info!(
                keys = summary.key_count,
                capacity = summary.capacity,
                outstanding = summary.outstanding,
                success_count = summary.successes,
                "update phase complete"
            ),
        }
        self.phase = Phase::Update;
        self.completed_phases += 1;
        summary
    }
}
