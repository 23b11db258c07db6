//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use holo_sweep::gate::ConcurrencyGate;
use holo_sweep::store::{
    Bin, ClientPolicy, Connector, Key, ReadPolicy, Record, RecordExistsAction, StoreConnection,
    StoreError, StoreTarget, WritePolicy,
};
use holo_sweep::{RetryPolicy, SweepConfig};

/// Upper bound for waiting on background tasks.
pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Operation observed by [`FakeStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Get(u64),
    Put(u64, RecordExistsAction),
}

/// In-process store keyed by primary key that records every call.
#[derive(Debug, Default)]
pub struct FakeStore {
    pub(crate) records: Mutex<HashMap<u64, String>>,
    pub(crate) ops: Mutex<Vec<Op>>,
    pub(crate) inflight: AtomicUsize,
    pub(crate) peak_inflight: AtomicUsize,
    /// Delay applied inside every put.
    pub put_delay: Duration,
    /// Ids whose create-only write is rejected.
    pub reject_inserts: HashSet<u64>,
}

impl FakeStore {
    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn value(&self, id: u64) -> Option<String> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn peak_inflight(&self) -> usize {
        self.peak_inflight.load(Ordering::SeqCst)
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

pub struct FakeConnection {
    store: Arc<FakeStore>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl StoreConnection for FakeConnection {
    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn get(
        &self,
        _policy: &ReadPolicy,
        key: &Key,
        bins: &[&str],
    ) -> Result<Option<Record>, StoreError> {
        let id = key.user_key();
        self.store.record(Op::Get(id));
        let value = self.store.value(id);
        Ok(value.map(|value| Record {
            key: key.clone(),
            bins: bins
                .iter()
                .map(|name| Bin {
                    name: (*name).to_string(),
                    value: value.clone(),
                })
                .collect(),
        }))
    }

    async fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), StoreError> {
        let id = key.user_key();
        self.store.record(Op::Put(id, policy.exists));

        let now = self.store.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.peak_inflight.fetch_max(now, Ordering::SeqCst);
        if !self.store.put_delay.is_zero() {
            tokio::time::sleep(self.store.put_delay).await;
        }
        self.store.inflight.fetch_sub(1, Ordering::SeqCst);

        if policy.exists == RecordExistsAction::CreateOnly
            && self.store.reject_inserts.contains(&id)
        {
            return Err(StoreError::Server("injected insert failure".to_string()));
        }
        let mut records = self.store.records.lock().unwrap();
        match (policy.exists, records.contains_key(&id)) {
            (RecordExistsAction::CreateOnly, true) => Err(StoreError::KeyExists),
            (RecordExistsAction::UpdateOnly, false) => Err(StoreError::KeyNotFound),
            _ => {
                records.insert(id, bins[0].value.clone());
                Ok(())
            }
        }
    }
}

/// Hands out [`FakeConnection`]s after failing the first `failures` attempts.
pub struct FakeConnector {
    pub store: Arc<FakeStore>,
    pub alive: Arc<AtomicBool>,
    pub failures: u32,
    pub attempts: Arc<AtomicU32>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self {
            store,
            alive: Arc::new(AtomicBool::new(false)),
            failures: 0,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(
        &self,
        target: &StoreTarget,
        _policy: &ClientPolicy,
    ) -> Result<FakeConnection, StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(StoreError::Connect {
                addr: target.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(FakeConnection {
            store: self.store.clone(),
            alive: self.alive.clone(),
        })
    }
}

/// Small, fast config for tests.
pub fn test_config(target: StoreTarget, keys: u64, max_inflight: usize) -> SweepConfig {
    let mut cfg = SweepConfig::new(target, "test", "demo", "payload");
    cfg.bin_len = 8;
    cfg.key_count = keys;
    cfg.max_inflight = max_inflight;
    cfg.pace = Duration::ZERO;
    cfg.op_timeout = Duration::from_secs(1);
    cfg.retry = RetryPolicy {
        max_attempts: 5,
        backoff: Duration::from_millis(1),
    };
    cfg.verbosity.errors = true;
    cfg
}

pub fn local_target(port: u16) -> StoreTarget {
    StoreTarget {
        host: "127.0.0.1".to_string(),
        port,
    }
}

/// Wait until every spawned key task has released its slot.
pub async fn wait_idle(gate: &ConcurrencyGate) {
    tokio::time::timeout(IO_TIMEOUT, gate.wait_for_outstanding_at_most(0))
        .await
        .expect("key tasks did not finish in time");
}

/// Pick an unused local port by binding to port 0.
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub fn ephemeral_addr() -> SocketAddr {
    "127.0.0.1:0".parse().expect("valid addr")
}
