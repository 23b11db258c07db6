//! End-to-end tests of the RESP client against the in-memory store server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ephemeral_addr, local_target, pick_free_port, test_config, wait_idle};
use holo_sweep::mem_server::{MemServer, MemStore};
use holo_sweep::payload::Repeated;
use holo_sweep::store::{
    Bin, ClientPolicy, Connector, Credentials, Key, ReadPolicy, RecordExistsAction,
    StoreConnection, StoreError, WritePolicy,
};
use holo_sweep::{Coordinator, Phase, RespConnector, SweepError};

const OP_TIMEOUT: Duration = Duration::from_secs(2);
const LARGE_OP_TIMEOUT: Duration = Duration::from_secs(20);

fn write_policy(exists: RecordExistsAction) -> WritePolicy {
    WritePolicy {
        timeout: OP_TIMEOUT,
        exists,
    }
}

fn credentials(password: &str) -> Credentials {
    Credentials {
        user: "sweeper".to_string(),
        password: password.to_string(),
    }
}

async fn start_server(store: MemStore) -> MemServer {
    MemServer::start(ephemeral_addr(), Arc::new(store))
        .await
        .expect("start mem store")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_and_update_only_semantics() {
    let server = start_server(MemStore::new()).await;
    let conn = RespConnector
        .connect(&local_target(server.addr.port()), &ClientPolicy::anonymous())
        .await
        .unwrap();
    assert!(conn.is_connected());

    let key = Key::new("test", "demo", 7).unwrap();
    let bin = Bin::new("payload", "first".to_string()).unwrap();
    let read = ReadPolicy::relaxed(OP_TIMEOUT);

    assert_eq!(conn.get(&read, &key, &["payload"]).await.unwrap(), None);
    assert_eq!(
        conn.put(&write_policy(RecordExistsAction::UpdateOnly), &key, &[bin.clone()])
            .await,
        Err(StoreError::KeyNotFound)
    );

    conn.put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin.clone()])
        .await
        .unwrap();
    assert_eq!(
        conn.put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin])
            .await,
        Err(StoreError::KeyExists)
    );

    let updated = Bin::new("payload", "second".to_string()).unwrap();
    conn.put(&write_policy(RecordExistsAction::UpdateOnly), &key, &[updated])
        .await
        .unwrap();

    let record = conn.get(&read, &key, &["payload"]).await.unwrap().unwrap();
    assert_eq!(record.key, key);
    assert_eq!(record.bins[0].value, "second");
    assert_eq!(
        server.store.value("test:demo:7:payload").as_deref(),
        Some(b"second".as_slice())
    );
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_requests_pair_with_their_replies() {
    let server = start_server(MemStore::new()).await;
    let conn = Arc::new(
        RespConnector
            .connect(&local_target(server.addr.port()), &ClientPolicy::anonymous())
            .await
            .unwrap(),
    );

    let writes = (1..=200u64).map(|id| {
        let conn = conn.clone();
        async move {
            let key = Key::new("test", "demo", id).unwrap();
            let bin = Bin::new("payload", format!("v{id}")).unwrap();
            conn.put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin])
                .await
        }
    });
    let results = futures_util::future::join_all(writes).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(server.store.len(), 200);

    let reads = (1..=200u64).map(|id| {
        let conn = conn.clone();
        async move {
            let key = Key::new("test", "demo", id).unwrap();
            let record = conn
                .get(&ReadPolicy::relaxed(OP_TIMEOUT), &key, &["payload"])
                .await
                .unwrap()
                .unwrap();
            (id, record.bins[0].value.clone())
        }
    });
    for (id, value) in futures_util::future::join_all(reads).await {
        assert_eq!(value, format!("v{id}"));
    }
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_reads_and_writes_share_the_connection() {
    let server = start_server(MemStore::new()).await;
    let conn = Arc::new(
        RespConnector
            .connect(&local_target(server.addr.port()), &ClientPolicy::anonymous())
            .await
            .unwrap(),
    );
    let large = "x".repeat(16 << 20);
    let big_key = Key::new("test", "demo", 0).unwrap();
    let put_large = WritePolicy {
        timeout: LARGE_OP_TIMEOUT,
        exists: RecordExistsAction::CreateOnly,
    };
    conn.put(&put_large, &big_key, &[Bin::new("payload", large.clone()).unwrap()])
        .await
        .unwrap();

    // Large replies flow back while large requests are still being written.
    let reads = (0..4).map(|_| {
        let conn = conn.clone();
        let big_key = big_key.clone();
        async move {
            conn.get(&ReadPolicy::relaxed(LARGE_OP_TIMEOUT), &big_key, &["payload"])
                .await
                .map(|record| record.map(|r| r.bins[0].value.len()))
        }
    });
    let writes = (1..=4u64).map(|id| {
        let conn = conn.clone();
        let bin = Bin::new("payload", large.clone()).unwrap();
        async move {
            let key = Key::new("test", "demo", id).unwrap();
            conn.put(&put_large, &key, &[bin]).await
        }
    });
    let (reads, writes) = tokio::join!(
        futures_util::future::join_all(reads),
        futures_util::future::join_all(writes)
    );
    for read in reads {
        assert_eq!(read.unwrap(), Some(large.len()));
    }
    assert!(writes.iter().all(Result::is_ok), "{writes:?}");

    let key = Key::new("test", "demo", 99).unwrap();
    let bin = Bin::new("payload", "small".to_string()).unwrap();
    conn.put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin])
        .await
        .unwrap();
    assert!(conn.is_connected());
    assert_eq!(server.store.len(), 6);
    server.shutdown();
}

/// Accepts connections and holds them open without ever replying.
async fn start_silent_listener() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind(ephemeral_addr()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (port, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_server_times_out_each_operation() {
    let (port, listener) = start_silent_listener().await;
    let conn = RespConnector
        .connect(&local_target(port), &ClientPolicy::anonymous())
        .await
        .unwrap();
    let key = Key::new("test", "demo", 1).unwrap();
    let timeout = Duration::from_millis(100);

    let started = tokio::time::Instant::now();
    let read = conn.get(&ReadPolicy::relaxed(timeout), &key, &["payload"]).await;
    assert_eq!(read, Err(StoreError::Timeout(timeout)));
    assert!(started.elapsed() >= timeout);

    let write = WritePolicy {
        timeout,
        exists: RecordExistsAction::CreateOnly,
    };
    let bin = Bin::new("payload", "x".to_string()).unwrap();
    assert_eq!(
        conn.put(&write, &key, &[bin]).await,
        Err(StoreError::Timeout(timeout))
    );
    assert!(conn.is_connected());
    listener.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_close_marks_connection_lost() {
    let listener = tokio::net::TcpListener::bind(ephemeral_addr()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let closer = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let conn = RespConnector
        .connect(&local_target(port), &ClientPolicy::anonymous())
        .await
        .unwrap();
    closer.await.unwrap();

    tokio::time::timeout(common::IO_TIMEOUT, async {
        while conn.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection loss detected");

    let key = Key::new("test", "demo", 1).unwrap();
    let read = conn.get(&ReadPolicy::relaxed(OP_TIMEOUT), &key, &["payload"]).await;
    assert_eq!(read, Err(StoreError::Disconnected));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auth_is_checked_on_connect() {
    let server = start_server(MemStore::with_credentials(credentials("hunter2"))).await;
    let target = local_target(server.addr.port());

    let err = RespConnector
        .connect(&target, &ClientPolicy::authenticated(credentials("wrong")))
        .await
        .err()
        .expect("wrong password rejected");
    assert!(matches!(err, StoreError::Auth(_)));

    let anonymous = RespConnector
        .connect(&target, &ClientPolicy::anonymous())
        .await
        .unwrap();
    let key = Key::new("test", "demo", 1).unwrap();
    let bin = Bin::new("payload", "x".to_string()).unwrap();
    let err = anonymous
        .put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin.clone()])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Server(msg) if msg.starts_with("NOAUTH")));

    let authed = RespConnector
        .connect(&target, &ClientPolicy::authenticated(credentials("hunter2")))
        .await
        .unwrap();
    authed
        .put(&write_policy(RecordExistsAction::CreateOnly), &key, &[bin])
        .await
        .unwrap();
    assert_eq!(server.store.len(), 1);
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_runs_against_mem_store() {
    let server = start_server(MemStore::new()).await;
    let cfg = test_config(local_target(server.addr.port()), 50, 16);
    let mut coord = Coordinator::with_values(&cfg, RespConnector, Arc::new(Repeated('z')));

    for _ in 0..50 {
        coord.step().await.unwrap();
    }
    let report = coord.step().await.unwrap();
    let summary = report.summary.expect("insert boundary");
    assert_eq!(summary.phase, Phase::Insert);
    assert_eq!(summary.successes, 50);
    assert_eq!(server.store.len(), 50);
    assert_eq!(server.store.get_count(), 0);

    for _ in 0..49 {
        coord.step().await.unwrap();
    }
    let report = coord.step().await.unwrap();
    let summary = report.summary.expect("update boundary");
    assert_eq!(summary.phase, Phase::Update);
    assert_eq!(summary.successes, 50);
    wait_idle(coord.gate()).await;

    assert!(server.store.get_count() >= 50);
    assert_eq!(server.store.len(), 50);
    assert_eq!(coord.connections().connects(), 1);
    assert_eq!(
        server.store.value("test:demo:1:payload").map(|v| v.len()),
        Some(cfg.bin_len)
    );
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_store_exhausts_retries() {
    let port = pick_free_port().unwrap();
    let mut cfg = test_config(local_target(port), 10, 4);
    cfg.retry.max_attempts = 3;
    let mut coord = Coordinator::with_values(&cfg, RespConnector, Arc::new(Repeated('z')));

    let err = coord.step().await.unwrap_err();
    match &err {
        SweepError::ConnectExhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(last, StoreError::Connect { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
    assert_eq!(coord.connections().connects(), 0);
}
