//! Store-client contract consumed by the sweep.
//!
//! The scheduler only needs a narrow slice of a key-value client: build a key,
//! connect, read one record, write one record under an existence policy. This
//! module defines those types and the two traits the scheduler is generic over.
//! `crate::resp` provides the production implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Longest namespace name accepted by [`Key::new`].
pub const MAX_NAMESPACE_LEN: usize = 31;
/// Longest set name accepted by [`Key::new`].
pub const MAX_SET_LEN: usize = 63;
/// Longest bin name accepted by [`Bin::new`].
pub const MAX_BIN_NAME_LEN: usize = 15;

/// Connect timeout for authenticated client policies.
pub const AUTH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Connect timeout when no credentials are configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by a store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid bin: {0}")]
    InvalidBin(String),
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("record already exists")]
    KeyExists,
    #[error("record not found")]
    KeyNotFound,
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected reply: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Disconnected,
}

/// Identifies one record: namespace, set and integer primary key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: u64,
}

impl Key {
    /// Build a key, validating the namespace and set names.
    pub fn new(namespace: &str, set: &str, user_key: u64) -> Result<Self, StoreError> {
        if namespace.is_empty() {
            return Err(StoreError::InvalidKey("namespace is empty".to_string()));
        }
        if namespace.len() > MAX_NAMESPACE_LEN {
            return Err(StoreError::InvalidKey(format!(
                "namespace {namespace:?} longer than {MAX_NAMESPACE_LEN} bytes"
            )));
        }
        if set.len() > MAX_SET_LEN {
            return Err(StoreError::InvalidKey(format!(
                "set {set:?} longer than {MAX_SET_LEN} bytes"
            )));
        }
        // ':' separates key components on the wire.
        if namespace.contains(':') || set.contains(':') {
            return Err(StoreError::InvalidKey(format!(
                "namespace {namespace:?} / set {set:?} must not contain ':'"
            )));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            user_key,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn user_key(&self) -> u64 {
        self.user_key
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set, self.user_key)
    }
}

/// One named value within a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub value: String,
}

impl Bin {
    pub fn new(name: &str, value: String) -> Result<Self, StoreError> {
        if name.is_empty() || name.len() > MAX_BIN_NAME_LEN {
            return Err(StoreError::InvalidBin(format!(
                "bin name {name:?} must be 1..={MAX_BIN_NAME_LEN} bytes"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

/// A record returned by a read. `key` is the store's handle for the record and
/// should be preferred over the caller's key for follow-up writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Key,
    pub bins: Vec<Bin>,
}

/// Which replica may serve a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaPolicy {
    Master,
    MasterOrReplica,
}

/// How many replicas a read consults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyLevel {
    One,
    All,
}

/// Read policy: timeout plus consistency and routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadPolicy {
    pub timeout: Duration,
    pub replica: ReplicaPolicy,
    pub consistency: ConsistencyLevel,
}

impl ReadPolicy {
    /// Single-replica read that may be served by master or replica.
    pub fn relaxed(timeout: Duration) -> Self {
        Self {
            timeout,
            replica: ReplicaPolicy::MasterOrReplica,
            consistency: ConsistencyLevel::One,
        }
    }
}

/// Constraint on whether a write may create or must replace a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordExistsAction {
    CreateOnly,
    UpdateOnly,
}

/// Write policy: timeout plus the existence constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WritePolicy {
    pub timeout: Duration,
    pub exists: RecordExistsAction,
}

/// Credentials for an authenticated connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection-level policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientPolicy {
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
}

impl ClientPolicy {
    pub fn anonymous() -> Self {
        Self {
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn authenticated(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            connect_timeout: AUTH_CONNECT_TIMEOUT,
        }
    }
}

/// Host and port of the seed node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A live connection. Implementations must be safe to share across many
/// concurrent tasks.
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Read `bins` of `key`. `Ok(None)` means the record does not exist.
    async fn get(
        &self,
        policy: &ReadPolicy,
        key: &Key,
        bins: &[&str],
    ) -> Result<Option<Record>, StoreError>;

    async fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> Result<(), StoreError>;
}

/// Factory for [`StoreConnection`]s.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: StoreConnection;

    async fn connect(
        &self,
        target: &StoreTarget,
        policy: &ClientPolicy,
    ) -> Result<Self::Conn, StoreError>;
}
