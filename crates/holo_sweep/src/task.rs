//! The unit of work for one key.
//!
//! Insert phase: create-only write. Update phase: relaxed read, then
//! update-only write. Every failure ends only this task; panics are caught at
//! the task boundary and the gate slot is released on every path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::accountant::Phase;
use crate::config::{SweepConfig, Verbosity};
use crate::gate::GateSlot;
use crate::payload::ValueGenerator;
use crate::store::{Bin, Key, ReadPolicy, RecordExistsAction, StoreConnection, WritePolicy};
use crate::tally::TallySink;

/// How a task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Written,
    /// Namespace or set rejected by [`Key::new`].
    InvalidKey,
    /// Bin name rejected by [`Bin::new`].
    InvalidBin,
    ReadFailed,
    WriteFailed,
    Faulted,
}

/// The slice of [`SweepConfig`] a task needs.
#[derive(Clone, Debug)]
pub struct TaskSettings {
    pub namespace: String,
    pub set: String,
    pub bin_name: String,
    pub bin_len: usize,
    pub op_timeout: Duration,
    pub verbosity: Verbosity,
}

impl From<&SweepConfig> for TaskSettings {
    fn from(cfg: &SweepConfig) -> Self {
        Self {
            namespace: cfg.namespace.clone(),
            set: cfg.set.clone(),
            bin_name: cfg.bin_name.clone(),
            bin_len: cfg.bin_len,
            op_timeout: cfg.op_timeout,
            verbosity: cfg.verbosity,
        }
    }
}

/// One key's work, spawned by the coordinator. Holds its gate slot until
/// [`KeyTask::run`] returns.
pub struct KeyTask<S: StoreConnection> {
    pub id: u64,
    pub phase: Phase,
    pub conn: Arc<S>,
    pub sink: TallySink,
    pub settings: Arc<TaskSettings>,
    pub values: Arc<dyn ValueGenerator>,
    pub slot: GateSlot,
}

impl<S: StoreConnection> KeyTask<S> {
    /// Run to completion. Never panics and never returns an error.
    pub async fn run(self) -> TaskOutcome {
        let KeyTask {
            id,
            phase,
            conn,
            sink,
            settings,
            values,
            slot,
        } = self;
        let work = KeyWork {
            id,
            phase,
            conn: conn.as_ref(),
            sink: &sink,
            settings: &settings,
            values: values.as_ref(),
            slot: &slot,
        };
        let outcome = match AssertUnwindSafe(work.execute()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                tracing::error!(
                    severity = "critical",
                    key = id,
                    panic = %panic_message(panic.as_ref()),
                    "recovered from fault in key task"
                );
                TaskOutcome::Faulted
            }
        };
        drop(slot);
        outcome
    }
}

struct KeyWork<'a, S: StoreConnection> {
    id: u64,
    phase: Phase,
    conn: &'a S,
    sink: &'a TallySink,
    settings: &'a TaskSettings,
    values: &'a dyn ValueGenerator,
    slot: &'a GateSlot,
}

impl<S: StoreConnection> KeyWork<'_, S> {
    async fn execute(self) -> TaskOutcome {
        let settings = self.settings;
        let log_errors = settings.verbosity.errors;
        let id = self.id;

        let mut key = match Key::new(&settings.namespace, &settings.set, id) {
            Ok(key) => key,
            Err(err) => {
                if log_errors {
                    tracing::error!(key = id, error = %err, "could not create key");
                }
                return TaskOutcome::InvalidKey;
            }
        };
        let bin = match Bin::new(&settings.bin_name, self.values.generate(settings.bin_len)) {
            Ok(bin) => bin,
            Err(err) => {
                if log_errors {
                    tracing::error!(key = id, error = %err, "could not create bin");
                }
                return TaskOutcome::InvalidBin;
            }
        };

        let exists = match self.phase {
            Phase::Insert => RecordExistsAction::CreateOnly,
            Phase::Update => {
                let policy = ReadPolicy::relaxed(settings.op_timeout);
                match self.conn.get(&policy, &key, &[settings.bin_name.as_str()]).await {
                    // The store's key handle may carry routing the local one lacks.
                    Ok(Some(record)) => key = record.key,
                    Ok(None) => {
                        if log_errors {
                            tracing::error!(key = id, "read returned no record, updating anyway");
                        }
                    }
                    Err(err) => {
                        if log_errors {
                            tracing::error!(key = id, error = %err, "could not get bins");
                        }
                        return TaskOutcome::ReadFailed;
                    }
                }
                RecordExistsAction::UpdateOnly
            }
        };

        let policy = WritePolicy {
            timeout: settings.op_timeout,
            exists,
        };
        if let Err(err) = self.conn.put(&policy, &key, std::slice::from_ref(&bin)).await {
            if log_errors {
                tracing::error!(key = id, phase = %self.phase, error = %err, "could not put bins");
            }
            return TaskOutcome::WriteFailed;
        }

        self.sink.signal();
        if settings.verbosity.debug {
            let outstanding = self.slot.outstanding();
            match self.phase {
                Phase::Insert => tracing::debug!(key = id, outstanding, "insert success"),
                Phase::Update => tracing::debug!(key = id, outstanding, "update success"),
            }
        }
        TaskOutcome::Written
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
