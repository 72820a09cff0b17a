use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::watch::{self, Ref};

use crate::{
    cmap::{establish::ConnectionEstablisher, ConnectionDescription, PoolStatus},
    error::{Error, ErrorKind, Result},
    options::{ClusterOptions, ServerAddress},
    runtime,
    sdam::{
        description::{
            server::{ServerDescription, RETRYABLE_WRITES_MIN_WIRE_VERSION},
            topology::{
                server_selection::{self, SelectedServer},
                ClusterDescription,
                ClusterType,
                SessionSupportStatus,
            },
        },
        Server,
    },
    selection_criteria::{ReadPreference, SelectionCriteria},
    session::{ClientSession, ServerSessionPool, SessionContext},
    trace::{TracingRepresentation, SERVER_SELECTION_TRACING_EVENT_TARGET},
};

/// The set of servers a client routes operations to, along with the latest description of each.
///
/// Descriptions are supplied from outside through [`Cluster::update`]; each update atomically
/// replaces the description stored for its address and wakes any pending server selection.
/// `Cluster` is cheap to clone and all clones share the same state.
#[derive(Clone, Debug)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

#[derive(Debug)]
struct ClusterInner {
    options: ClusterOptions,
    establisher: Arc<dyn ConnectionEstablisher>,
    session_pool: ServerSessionPool,
    broadcaster: ClusterBroadcaster,
    watcher: ClusterWatcher,
}

#[derive(Debug, Clone)]
pub(crate) struct ClusterState {
    pub(crate) description: ClusterDescription,
    pub(crate) servers: HashMap<ServerAddress, Arc<Server>>,
}

impl Cluster {
    /// Creates a cluster tracking the seeds in `options.hosts`. Connections to its servers are
    /// opened through `establisher`.
    pub fn new(
        options: ClusterOptions,
        establisher: impl ConnectionEstablisher + 'static,
    ) -> Result<Self> {
        options.validate()?;
        let establisher: Arc<dyn ConnectionEstablisher> = Arc::new(establisher);

        let description = ClusterDescription::new(&options);
        let servers = description
            .server_addresses()
            .map(|address| {
                (
                    address.clone(),
                    Server::new(address.clone(), &options, establisher.clone()),
                )
            })
            .collect();

        let (watcher, broadcaster) = ClusterWatcher::channel(ClusterState {
            description,
            servers,
        });

        Ok(Self {
            inner: Arc::new(ClusterInner {
                options,
                establisher,
                session_pool: ServerSessionPool::new(),
                broadcaster,
                watcher,
            }),
        })
    }

    pub(crate) fn options(&self) -> &ClusterOptions {
        &self.inner.options
    }

    #[cfg(test)]
    pub(crate) fn session_pool(&self) -> &ServerSessionPool {
        &self.inner.session_pool
    }

    /// Replaces the stored description for `description.address`. An address the cluster hasn't
    /// seen before is added along with a connection pool for it.
    pub fn update(&self, description: ServerDescription) {
        let address = description.address.clone();
        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            address = %address,
            server_type = %description.server_type,
            ok = description.ok,
            "Server description updated"
        );

        let options = &self.inner.options;
        let establisher = &self.inner.establisher;
        self.inner.broadcaster.modify(|state| {
            state.description.update(description);
            state
                .servers
                .entry(address.clone())
                .or_insert_with(|| Server::new(address, options, establisher.clone()));
        });
    }

    /// Stops tracking the server at `address`. Returns whether it was known.
    pub fn remove(&self, address: &ServerAddress) -> bool {
        let mut removed = false;
        self.inner.broadcaster.modify(|state| {
            removed = state.description.remove(address).is_some();
            state.servers.remove(address);
        });
        removed
    }

    /// The type of the cluster, derived from the current descriptions.
    pub fn cluster_type(&self) -> ClusterType {
        self.inner.watcher.borrow_latest().description.cluster_type
    }

    /// The current description of the server at `address`, if it is known.
    pub fn server_description(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.inner.watcher.server_description(address)
    }

    /// The counters of the connection pool for the server at `address`.
    pub fn pool_status(&self, address: &ServerAddress) -> Option<PoolStatus> {
        self.inner
            .watcher
            .borrow_latest()
            .servers
            .get(address)
            .map(|server| server.pool.status())
    }

    /// Waits for a server suitable for reads with the given preference and returns the
    /// description it was selected with.
    pub async fn select_for_read(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<ServerDescription> {
        let criteria = SelectionCriteria::ReadPreference(read_preference.clone());
        let server = self.select_server(&criteria).await?;
        Ok(server.description().clone())
    }

    /// Waits for a server that accepts writes and returns the description it was selected with.
    pub async fn select_for_write(&self) -> Result<ServerDescription> {
        let server = self
            .select_server(&SelectionCriteria::ReadPreference(ReadPreference::Primary))
            .await?;
        Ok(server.description().clone())
    }

    /// Select a server using the provided criteria, waiting for description updates until the
    /// server selection timeout elapses.
    pub(crate) async fn select_server(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<SelectedServer> {
        let start_time = Instant::now();
        let timeout = self.inner.options.server_selection_timeout();

        tracing::debug!(
            target: SERVER_SELECTION_TRACING_EVENT_TARGET,
            selector = criteria.tracing_representation(),
            "Server selection started"
        );

        let mut emitted_waiting_message = false;
        let mut watcher = self.inner.watcher.clone();
        loop {
            let (selected, failure) = {
                let state = watcher.observe_latest();
                let selected = server_selection::attempt_to_select_server(
                    criteria,
                    &state.description,
                    &state.servers,
                );
                let failure = match selected {
                    Some(_) => None,
                    None => Some((
                        state
                            .description
                            .server_selection_timeout_error_message(criteria),
                        state.description.tracing_representation(),
                    )),
                };
                (selected, failure)
            };

            if let Some(server) = selected {
                tracing::debug!(
                    target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                    selector = criteria.tracing_representation(),
                    serverHost = server.address.host.as_str(),
                    serverPort = server.address.port_or_default(),
                    "Server selection succeeded"
                );
                return Ok(server);
            }

            let remaining = timeout.checked_sub(start_time.elapsed());
            let remaining = match remaining {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    let (message, cluster_description) = failure.unwrap_or_default();
                    let error = Error::server_selection(message);
                    tracing::debug!(
                        target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                        selector = criteria.tracing_representation(),
                        topologyDescription = cluster_description.as_str(),
                        failure = error.tracing_representation(),
                        "Server selection failed"
                    );
                    return Err(error);
                }
            };

            if !emitted_waiting_message {
                tracing::info!(
                    target: SERVER_SELECTION_TRACING_EVENT_TARGET,
                    selector = criteria.tracing_representation(),
                    remainingTimeMS = remaining.as_millis() as u64,
                    "Waiting for suitable server to become available"
                );
                emitted_waiting_message = true;
            }

            watcher.wait_for_update(remaining).await;
        }
    }

    pub(crate) fn session_support_status(&self) -> SessionSupportStatus {
        self.inner
            .watcher
            .borrow_latest()
            .description
            .session_support_status()
    }

    /// Resolves whether the deployment supports sessions, selecting a data-bearing server first
    /// if nothing has been described yet.
    pub(crate) async fn resolve_session_support(&self) -> Result<SessionSupportStatus> {
        let status = self.session_support_status();
        if status != SessionSupportStatus::Undetermined {
            return Ok(status);
        }

        let criteria = SelectionCriteria::Predicate(Arc::new(|server: &ServerDescription| {
            server.server_type.is_data_bearing()
        }));
        drop(self.select_server(&criteria).await?);
        Ok(self.session_support_status())
    }

    /// Starts a new explicit session.
    ///
    /// Fails with [`ErrorKind::SessionsNotSupported`] when the deployment doesn't support
    /// logical sessions.
    pub async fn start_session(&self) -> Result<ClientSession> {
        match self.resolve_session_support().await? {
            SessionSupportStatus::Supported {
                logical_session_timeout,
            } => Ok(ClientSession::new(
                self.inner.session_pool.check_out(logical_session_timeout),
                self.inner.session_pool.clone(),
                logical_session_timeout,
                false,
            )),
            _ => Err(ErrorKind::SessionsNotSupported.into()),
        }
    }

    /// Starts a session on behalf of an operation whose caller didn't supply one. Returns `None`
    /// when the deployment doesn't support sessions.
    pub(crate) async fn start_implicit_session(&self) -> Result<Option<ClientSession>> {
        match self.resolve_session_support().await? {
            SessionSupportStatus::Supported {
                logical_session_timeout,
            } => Ok(Some(ClientSession::new(
                self.inner.session_pool.check_out(logical_session_timeout),
                self.inner.session_pool.clone(),
                logical_session_timeout,
                true,
            ))),
            _ => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn server(&self, address: &ServerAddress) -> Option<Arc<Server>> {
        self.inner
            .watcher
            .borrow_latest()
            .servers
            .get(address)
            .cloned()
    }
}

/// Whether a write that failed with a retryable error may be retried on the server that was
/// selected for the second attempt.
///
/// The server must belong to a replica set or sharded deployment, both it and the connection
/// must report support for retryable writes, and the session context must carry a session that
/// permits retries.
pub fn can_retry_write(
    server_description: &ServerDescription,
    connection_description: &ConnectionDescription,
    session_context: &SessionContext,
) -> bool {
    if !session_context.has_session() || !session_context.retry_writes_enabled() {
        return false;
    }

    server_description.supports_retryable_writes()
        && connection_description.server_type.is_retry_capable()
        && connection_description.max_wire_version >= RETRYABLE_WRITES_MIN_WIRE_VERSION
}

#[derive(Debug, Clone)]
pub(crate) struct ClusterWatcher {
    receiver: watch::Receiver<ClusterState>,
}

impl ClusterWatcher {
    fn channel(initial_state: ClusterState) -> (ClusterWatcher, ClusterBroadcaster) {
        let (tx, rx) = watch::channel(initial_state);
        let watcher = ClusterWatcher { receiver: rx };
        let broadcaster = ClusterBroadcaster { state_sender: tx };
        (watcher, broadcaster)
    }

    pub(crate) fn server_description(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.receiver
            .borrow()
            .description
            .get_server_description(address)
            .cloned()
    }

    /// Borrows the latest state, marking it as seen.
    pub(crate) fn observe_latest(&mut self) -> Ref<'_, ClusterState> {
        self.receiver.borrow_and_update()
    }

    pub(crate) async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        runtime::timeout(timeout, self.receiver.changed())
            .await
            .map(|changed| changed.is_ok())
            .unwrap_or(false)
    }

    pub(crate) fn borrow_latest(&self) -> Ref<'_, ClusterState> {
        self.receiver.borrow()
    }
}

#[derive(Debug)]
struct ClusterBroadcaster {
    state_sender: watch::Sender<ClusterState>,
}

impl ClusterBroadcaster {
    /// Applies `f` to the state and publishes the result as a new snapshot. Readers observe
    /// either the old or the new state, never a partial update.
    fn modify(&self, f: impl FnOnce(&mut ClusterState)) {
        self.state_sender.send_modify(f);
    }
}
