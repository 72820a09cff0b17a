//! Contains the sync API. This is only available when the `sync` feature is enabled.
//!
//! Every type here wraps its asynchronous counterpart and drives it to completion on a runtime
//! owned by the crate, so the observable behavior is identical. None of these methods may be
//! called from within an async context.

#[cfg(test)]
mod test;

use std::sync::LazyLock;

use crate::{
    binding::{ClusterBinding as AsyncClusterBinding, ConnectionSource as AsyncConnectionSource},
    bson::Document,
    cmap::{Command, ConnectionDescription, PooledConnection as AsyncPooledConnection},
    error::Result,
    executor::OperationExecutor as AsyncOperationExecutor,
    operation::{ReadOperation, WriteOperation},
    runtime,
    sdam::{Cluster, ServerDescription},
    selection_criteria::ReadPreference,
    session::{ClientSession, SessionContext},
};

pub(crate) static TOKIO_RUNTIME: LazyLock<tokio::runtime::Runtime> =
    LazyLock::new(|| match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => panic!(
            "Error occurred when starting the underlying async runtime: {}",
            err
        ),
    });

/// A blocking [`OperationExecutor`](crate::OperationExecutor).
#[derive(Clone, Debug)]
pub struct OperationExecutor {
    async_executor: AsyncOperationExecutor,
}

impl OperationExecutor {
    /// Creates an executor for `cluster`.
    pub fn new(cluster: Cluster) -> Self {
        Self {
            async_executor: AsyncOperationExecutor::new(cluster),
        }
    }

    /// The cluster operations are executed against.
    pub fn cluster(&self) -> &Cluster {
        self.async_executor.cluster()
    }

    /// Starts a new explicit session.
    pub fn start_session(&self) -> Result<ClientSession> {
        runtime::block_on(self.async_executor.cluster().start_session())
    }

    /// Executes a read routed with `read_preference`, blocking until it completes.
    pub fn execute_read<O: ReadOperation>(
        &self,
        operation: &O,
        read_preference: ReadPreference,
        session: Option<&ClientSession>,
    ) -> Result<O::Output> {
        runtime::block_on(
            self.async_executor
                .execute_read(operation, read_preference, session),
        )
    }

    /// Executes a write on the primary, blocking until it completes.
    pub fn execute_write<O: WriteOperation>(
        &self,
        operation: &O,
        session: Option<&ClientSession>,
    ) -> Result<O::Output> {
        runtime::block_on(self.async_executor.execute_write(operation, session))
    }
}

/// A blocking [`ClusterBinding`](crate::ClusterBinding).
#[derive(Debug)]
pub struct ClusterBinding {
    async_binding: AsyncClusterBinding,
}

impl ClusterBinding {
    /// Creates a binding over `cluster`, starting an implicit session if none is supplied.
    pub fn new(
        cluster: &Cluster,
        read_preference: ReadPreference,
        session: impl Into<Option<ClientSession>>,
    ) -> Result<Self> {
        let async_binding =
            runtime::block_on(AsyncClusterBinding::new(cluster, read_preference, session))?;
        Ok(Self { async_binding })
    }

    /// Whether the binding started the session it carries and ends it when dropped.
    pub fn owns_session(&self) -> bool {
        self.async_binding.owns_session()
    }

    /// The session context commands sent through this binding carry.
    pub fn session_context(&self) -> &SessionContext {
        self.async_binding.session_context()
    }

    /// The read preference reads are routed with, taking an active transaction into account.
    pub fn read_preference(&self) -> ReadPreference {
        self.async_binding.read_preference()
    }

    /// Selects a server for a read and leases it.
    pub fn read_connection_source(&self) -> Result<ConnectionSource> {
        runtime::block_on(self.async_binding.read_connection_source())
            .map(|async_source| ConnectionSource { async_source })
    }

    /// Selects a server that accepts writes and leases it.
    pub fn write_connection_source(&self) -> Result<ConnectionSource> {
        runtime::block_on(self.async_binding.write_connection_source())
            .map(|async_source| ConnectionSource { async_source })
    }
}

/// A blocking [`ConnectionSource`](crate::ConnectionSource).
#[derive(Debug)]
pub struct ConnectionSource {
    async_source: AsyncConnectionSource,
}

impl ConnectionSource {
    /// The description the server was selected with.
    pub fn server_description(&self) -> &ServerDescription {
        self.async_source.server_description()
    }

    /// The session context commands sent through this source carry.
    pub fn session_context(&self) -> &SessionContext {
        self.async_source.session_context()
    }

    /// Checks out a connection from the selected server's pool, blocking until one is available.
    pub fn connection(&self) -> Result<PooledConnection> {
        runtime::block_on(self.async_source.connection())
            .map(|async_connection| PooledConnection { async_connection })
    }

    /// Takes out another lease on the same server.
    pub fn retain(&self) -> Self {
        Self {
            async_source: self.async_source.retain(),
        }
    }

    /// Releases the lease. Equivalent to dropping the source.
    pub fn release(self) {}
}

/// A blocking [`PooledConnection`](crate::PooledConnection).
#[derive(Debug)]
pub struct PooledConnection {
    async_connection: AsyncPooledConnection,
}

impl PooledConnection {
    /// The description of the server this connection is established to.
    pub fn description(&self) -> &ConnectionDescription {
        self.async_connection.description()
    }

    /// Sends `command` and blocks until its reply arrives.
    pub fn command(&mut self, command: Command, session: &SessionContext) -> Result<Document> {
        runtime::block_on(self.async_connection.command(command, session))
    }
}
