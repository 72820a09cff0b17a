//! Connection pooling: one pool per server, handing out leased connections that check
//! themselves back in when dropped.

pub(crate) mod conn;
pub(crate) mod establish;
mod options;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
};

use derive_where::derive_where;
use tokio::sync::Semaphore;

pub use self::conn::{
    command::{Command, CommandResponse},
    Connection,
    ConnectionDescription,
    PooledConnection,
};
pub(crate) use self::options::ConnectionPoolOptions;
use self::establish::ConnectionEstablisher;
use crate::{
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    runtime,
    trace::CONNECTION_TRACING_EVENT_TARGET,
};

/// A pool of connections to a single server.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive_where(Debug)]
pub(crate) struct PoolInner {
    address: ServerAddress,

    establisher: Arc<dyn ConnectionEstablisher>,

    options: ConnectionPoolOptions,

    /// One permit per connection the pool may still hand out.
    #[derive_where(skip)]
    permits: Arc<Semaphore>,

    /// Connections that are checked in and ready for reuse, oldest first.
    #[derive_where(skip)]
    idle: Mutex<VecDeque<Box<dyn Connection>>>,

    next_connection_id: AtomicU32,

    counters: PoolCounters,
}

#[derive(Debug, Default)]
struct PoolCounters {
    checked_out: AtomicU32,
    total_checkouts: AtomicU64,
    total_checkins: AtomicU64,
    established: AtomicU64,
    closed: AtomicU64,
}

/// A point-in-time view of a connection pool's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolStatus {
    /// Connections currently leased to operations.
    pub checked_out: u32,

    /// Connections sitting idle in the pool.
    pub idle: usize,

    /// Checkouts over the lifetime of the pool.
    pub total_checkouts: u64,

    /// Check-ins over the lifetime of the pool. Equals `total_checkouts` whenever nothing is
    /// checked out.
    pub total_checkins: u64,

    /// Connections established by the pool.
    pub established: u64,

    /// Connections closed because they saw a network error.
    pub closed: u64,
}

impl ConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: Arc<dyn ConnectionEstablisher>,
        options: ConnectionPoolOptions,
    ) -> Self {
        let max_pool_size = usize::try_from(options.max_pool_size).unwrap_or(usize::MAX);
        Self {
            inner: Arc::new(PoolInner {
                address,
                establisher,
                permits: Arc::new(Semaphore::new(max_pool_size.min(Semaphore::MAX_PERMITS))),
                options,
                idle: Mutex::new(VecDeque::new()),
                next_connection_id: AtomicU32::new(1),
                counters: PoolCounters::default(),
            }),
        }
    }

    /// Checks out a connection, reusing an idle one if possible and establishing a new one
    /// otherwise. Waits for capacity when the pool is at its maximum size, failing with
    /// [`ErrorKind::WaitQueueTimeout`] if a wait queue timeout is configured and elapses.
    pub(crate) async fn check_out(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        let acquire = inner.permits.clone().acquire_owned();
        let permit = match inner.options.wait_queue_timeout {
            Some(timeout) => runtime::timeout(timeout, acquire).await.map_err(|_| {
                Error::from(ErrorKind::WaitQueueTimeout {
                    address: inner.address.clone(),
                })
            })?,
            None => acquire.await,
        }
        .map_err(|_| Error::internal("connection pool closed"))?;

        let connection = match inner.take_idle() {
            Some(connection) => connection,
            None => {
                let id = inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
                let connection = inner.establisher.establish(&inner.address, id).await?;
                inner.counters.established.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    target: CONNECTION_TRACING_EVENT_TARGET,
                    serverHost = inner.address.host.as_str(),
                    serverPort = inner.address.port_or_default(),
                    driverConnectionId = id,
                    "Connection created"
                );
                connection
            }
        };

        inner.counters.checked_out.fetch_add(1, Ordering::SeqCst);
        inner.counters.total_checkouts.fetch_add(1, Ordering::SeqCst);
        let connection = PooledConnection::new(connection, inner.clone(), permit);
        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            serverHost = inner.address.host.as_str(),
            serverPort = inner.address.port_or_default(),
            driverConnectionId = connection.id(),
            "Connection checked out"
        );
        Ok(connection)
    }

    pub(crate) fn status(&self) -> PoolStatus {
        self.inner.status()
    }
}

impl PoolInner {
    fn take_idle(&self) -> Option<Box<dyn Connection>> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Returns a connection to the pool. Broken connections are closed rather than reused.
    pub(crate) fn check_in(&self, connection: Box<dyn Connection>, broken: bool) {
        let id = connection.description().connection_id;
        self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.counters.total_checkins.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            serverHost = self.address.host.as_str(),
            serverPort = self.address.port_or_default(),
            driverConnectionId = id,
            "Connection checked in"
        );

        if broken {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                target: CONNECTION_TRACING_EVENT_TARGET,
                serverHost = self.address.host.as_str(),
                serverPort = self.address.port_or_default(),
                driverConnectionId = id,
                reason = "An error occurred while using the connection",
                "Connection closed"
            );
            drop(connection);
            return;
        }

        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(connection);
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            checked_out: self.counters.checked_out.load(Ordering::SeqCst),
            idle: self
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            total_checkouts: self.counters.total_checkouts.load(Ordering::SeqCst),
            total_checkins: self.counters.total_checkins.load(Ordering::SeqCst),
            established: self.counters.established.load(Ordering::SeqCst),
            closed: self.counters.closed.load(Ordering::SeqCst),
        }
    }
}
