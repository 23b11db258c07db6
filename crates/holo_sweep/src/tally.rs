//! Per-phase success counting.
//!
//! Tasks push one unit per successful write into a bounded channel; the
//! coordinator drains it at each phase boundary. The channel is sized for a
//! full sweep plus everything that can still be in flight, so a send only
//! fails if the coordinator stopped draining.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Producer side, cloned into every task.
#[derive(Clone, Debug)]
pub struct TallySink {
    tx: mpsc::Sender<()>,
}

/// Consumer side, owned by the coordinator.
#[derive(Debug)]
pub struct SuccessTally {
    rx: mpsc::Receiver<()>,
}

/// Create a tally able to buffer `capacity` successes between drains.
pub fn success_tally(capacity: usize) -> (TallySink, SuccessTally) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TallySink { tx }, SuccessTally { rx })
}

impl TallySink {
    /// Record one success. Returns false if the unit was dropped.
    pub fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::warn!("success tally full, dropping signal");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl SuccessTally {
    /// Take every buffered success and return how many there were.
    pub fn drain(&mut self) -> u64 {
        let mut count = 0u64;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}
