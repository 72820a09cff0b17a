//! Bindings turn the intent to read or write into a [`ConnectionSource`] leased on a selected
//! server, carrying the session the operation runs with.


use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    cmap::PooledConnection,
    error::{ErrorKind, Result},
    sdam::{Cluster, SelectedServer, ServerDescription},
    selection_criteria::{ReadPreference, SelectionCriteria},
    session::{ClientSession, SessionContext},
};

/// Produces connection sources for reads.
pub trait ReadBinding: Send + Sync {
    /// The read preference reads through this binding are routed with. While the session has an
    /// active transaction this is the transaction's read preference.
    fn read_preference(&self) -> ReadPreference;

    /// The session context commands sent through this binding carry.
    fn session_context(&self) -> &SessionContext;

    /// Selects a server suitable for the binding's read preference and leases it.
    fn read_connection_source(&self) -> BoxFuture<'_, Result<ConnectionSource>>;
}

/// Produces connection sources for writes.
pub trait WriteBinding: Send + Sync {
    /// The session context commands sent through this binding carry.
    fn session_context(&self) -> &SessionContext;

    /// Selects a server that accepts writes and leases it.
    fn write_connection_source(&self) -> BoxFuture<'_, Result<ConnectionSource>>;
}

/// A binding backed by a [`Cluster`].
///
/// When no session is supplied and the deployment supports sessions, the binding starts an
/// implicit session and owns it: the session is ended when the binding is dropped.
#[derive(Debug)]
pub struct ClusterBinding {
    cluster: Cluster,
    read_preference: ReadPreference,
    session: SessionContext,
    owns_session: bool,
}

impl ClusterBinding {
    /// Creates a binding over `cluster`. Reads are routed with `read_preference` unless the
    /// session has an active transaction.
    pub async fn new(
        cluster: &Cluster,
        read_preference: ReadPreference,
        session: impl Into<Option<ClientSession>>,
    ) -> Result<Self> {
        let retry_writes = cluster.options().retry_writes();
        let (session, owns_session) = match session.into() {
            Some(session) => (Some(session), false),
            None => (cluster.start_implicit_session().await?, true),
        };

        Ok(Self {
            cluster: cluster.clone(),
            read_preference,
            session: SessionContext::new(session, retry_writes),
            owns_session,
        })
    }

    /// Whether the binding started the session it carries and ends it when dropped.
    pub fn owns_session(&self) -> bool {
        self.owns_session
    }

    /// The session context commands sent through this binding carry.
    pub fn session_context(&self) -> &SessionContext {
        &self.session
    }

    /// The read preference reads are routed with, taking an active transaction into account.
    pub fn read_preference(&self) -> ReadPreference {
        if self.session.has_active_transaction() {
            return self
                .session
                .transaction_read_preference()
                .unwrap_or(ReadPreference::Primary);
        }
        self.read_preference.clone()
    }

    /// Selects a server for a read and leases it.
    ///
    /// Reads in a transaction must resolve to the primary; anything else is rejected before a
    /// server is selected.
    pub async fn read_connection_source(&self) -> Result<ConnectionSource> {
        let read_preference = self.read_preference();
        if self.session.has_active_transaction() && !read_preference.is_primary() {
            return Err(ErrorKind::InvalidReadPreferenceInTransaction {
                read_preference: read_preference.to_string(),
            }
            .into());
        }
        self.connection_source(SelectionCriteria::ReadPreference(read_preference))
            .await
    }

    /// Selects a server that accepts writes and leases it.
    pub async fn write_connection_source(&self) -> Result<ConnectionSource> {
        self.connection_source(SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await
    }

    async fn connection_source(&self, criteria: SelectionCriteria) -> Result<ConnectionSource> {
        let server = self.cluster.select_server(&criteria).await?;
        self.session.update_last_use();
        Ok(ConnectionSource::new(server, self.session.clone()))
    }
}

impl ReadBinding for ClusterBinding {
    fn read_preference(&self) -> ReadPreference {
        ClusterBinding::read_preference(self)
    }

    fn session_context(&self) -> &SessionContext {
        ClusterBinding::session_context(self)
    }

    fn read_connection_source(&self) -> BoxFuture<'_, Result<ConnectionSource>> {
        ClusterBinding::read_connection_source(self).boxed()
    }
}

impl WriteBinding for ClusterBinding {
    fn session_context(&self) -> &SessionContext {
        ClusterBinding::session_context(self)
    }

    fn write_connection_source(&self) -> BoxFuture<'_, Result<ConnectionSource>> {
        ClusterBinding::write_connection_source(self).boxed()
    }
}

impl Drop for ClusterBinding {
    fn drop(&mut self) {
        if !self.owns_session {
            return;
        }
        if let Some(session) = self.session.session() {
            session.end();
        }
    }
}

/// A lease on one selected server for the duration of a single operation attempt.
///
/// The server's in-flight operation count includes every live source, so dropping (or
/// [releasing](ConnectionSource::release)) a source is what returns its capacity. Connections
/// checked out through a source are leased separately and must be dropped before the source.
#[derive(Debug)]
pub struct ConnectionSource {
    server: SelectedServer,
    session: SessionContext,
}

impl ConnectionSource {
    pub(crate) fn new(server: SelectedServer, session: SessionContext) -> Self {
        Self { server, session }
    }

    /// The description the server was selected with.
    pub fn server_description(&self) -> &ServerDescription {
        self.server.description()
    }

    /// The session context commands sent through this source carry.
    pub fn session_context(&self) -> &SessionContext {
        &self.session
    }

    /// Checks out a connection from the selected server's pool.
    pub async fn connection(&self) -> Result<PooledConnection> {
        self.server.pool.check_out().await
    }

    /// Takes out another lease on the same server.
    pub fn retain(&self) -> Self {
        Self {
            server: self.server.clone(),
            session: self.session.clone(),
        }
    }

    /// Releases the lease. Equivalent to dropping the source.
    pub fn release(self) {}
}
