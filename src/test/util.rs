use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    bson::{doc, Document},
    cmap::{establish::ConnectionEstablisher, Command, CommandResponse, Connection},
    error::{CommandError, Error, ErrorKind, Result},
    options::{ClusterOptions, ServerAddress},
    sdam::{Cluster, ServerType},
    ConnectionDescription,
    ServerDescription,
};

pub(crate) const LOGICAL_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub(crate) const MAX_WIRE_VERSION: i32 = 17;

/// What a mock connection answers to the next command sent to its server.
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    Reply(Document),
    Error(Error),
}

impl MockReply {
    pub(crate) fn ok() -> Self {
        Self::Reply(doc! { "ok": 1 })
    }

    pub(crate) fn command_error(code: i32, message: &str) -> Self {
        Self::Error(ErrorKind::Command(CommandError::new(code, "", message)).into())
    }

    pub(crate) fn network_error() -> Self {
        Self::Error(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into())
    }
}

/// A command sent through a mock connection.
#[derive(Clone, Debug)]
pub(crate) struct CommandRecord {
    pub(crate) address: ServerAddress,
    pub(crate) connection_id: u32,
    pub(crate) command: Command,
}

#[derive(Debug, Default)]
struct MockState {
    /// Connection descriptions handed to connections, by server.
    descriptions: Mutex<HashMap<ServerAddress, ConnectionDescription>>,

    /// Scripted replies, by server. An exhausted queue answers `{ ok: 1 }`.
    replies: Mutex<HashMap<ServerAddress, VecDeque<MockReply>>>,

    /// Servers that refuse new connections.
    unreachable: Mutex<Vec<ServerAddress>>,

    commands: Mutex<Vec<CommandRecord>>,

    established: AtomicU32,
}

/// A [`ConnectionEstablisher`] whose connections answer from per-server reply scripts and log
/// every command they are sent.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockEstablisher {
    state: Arc<MockState>,
}

impl MockEstablisher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes connections to `description.address` report the given server's type, wire version
    /// and session timeout.
    pub(crate) fn describe(&self, description: &ServerDescription) {
        let connection_description = ConnectionDescription::builder()
            .server_address(description.address.clone())
            .server_type(description.server_type)
            .max_wire_version(description.max_wire_version)
            .logical_session_timeout(description.logical_session_timeout)
            .build();
        self.state
            .descriptions
            .lock()
            .unwrap()
            .insert(description.address.clone(), connection_description);
    }

    /// Overrides what connections to `address` report as their wire version.
    pub(crate) fn set_connection_max_wire_version(&self, address: &ServerAddress, version: i32) {
        if let Some(description) = self.state.descriptions.lock().unwrap().get_mut(address) {
            description.max_wire_version = version;
        }
    }

    pub(crate) fn push_reply(&self, address: &ServerAddress, reply: MockReply) {
        self.state
            .replies
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn set_unreachable(&self, address: &ServerAddress) {
        self.state.unreachable.lock().unwrap().push(address.clone());
    }

    pub(crate) fn commands(&self) -> Vec<CommandRecord> {
        self.state.commands.lock().unwrap().clone()
    }

    pub(crate) fn command_names(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .map(|record| record.command.name)
            .collect()
    }

    pub(crate) fn established(&self) -> u32 {
        self.state.established.load(Ordering::SeqCst)
    }
}

impl ConnectionEstablisher for MockEstablisher {
    fn establish<'a>(
        &'a self,
        address: &'a ServerAddress,
        connection_id: u32,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        async move {
            if self.state.unreachable.lock().unwrap().contains(address) {
                return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
            }
            let mut description = self
                .state
                .descriptions
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_else(|| {
                    ConnectionDescription::builder()
                        .server_address(address.clone())
                        .build()
                });
            description.connection_id = connection_id;
            self.state.established.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                description,
                state: self.state.clone(),
            }) as Box<dyn Connection>)
        }
        .boxed()
    }
}

#[derive(Debug)]
struct MockConnection {
    description: ConnectionDescription,
    state: Arc<MockState>,
}

impl Connection for MockConnection {
    fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<CommandResponse>> {
        async move {
            let address = self.description.server_address.clone();
            self.state.commands.lock().unwrap().push(CommandRecord {
                address: address.clone(),
                connection_id: self.description.connection_id,
                command,
            });
            let reply = self
                .state
                .replies
                .lock()
                .unwrap()
                .get_mut(&address)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(MockReply::ok);
            match reply {
                MockReply::Reply(body) => Ok(CommandResponse::new(address, body)),
                MockReply::Error(error) => Err(error),
            }
        }
        .boxed()
    }
}

fn described(address: &str, server_type: ServerType) -> ServerDescription {
    ServerDescription::builder()
        .address(ServerAddress::parse(address).unwrap())
        .server_type(server_type)
        .max_wire_version(MAX_WIRE_VERSION)
        .round_trip_time(Duration::from_millis(1))
        .logical_session_timeout(LOGICAL_SESSION_TIMEOUT)
        .build()
}

pub(crate) fn primary(address: &str) -> ServerDescription {
    described(address, ServerType::RsPrimary)
}

pub(crate) fn secondary(address: &str) -> ServerDescription {
    described(address, ServerType::RsSecondary)
}

pub(crate) fn mongos(address: &str) -> ServerDescription {
    described(address, ServerType::Mongos)
}

pub(crate) fn standalone(address: &str) -> ServerDescription {
    described(address, ServerType::Standalone)
}

/// Options seeding the given descriptions with a short server selection timeout.
pub(crate) fn cluster_options(descriptions: &[ServerDescription]) -> ClusterOptions {
    ClusterOptions::builder()
        .hosts(
            descriptions
                .iter()
                .map(|description| description.address.clone())
                .collect::<Vec<_>>(),
        )
        .server_selection_timeout(Duration::from_millis(200))
        .build()
}

/// A cluster over a mock establisher with every description already published.
pub(crate) fn mock_cluster(descriptions: Vec<ServerDescription>) -> (Cluster, MockEstablisher) {
    mock_cluster_with_options(cluster_options(&descriptions), descriptions)
}

pub(crate) fn mock_cluster_with_options(
    options: ClusterOptions,
    descriptions: Vec<ServerDescription>,
) -> (Cluster, MockEstablisher) {
    let establisher = MockEstablisher::new();
    let cluster = Cluster::new(options, establisher.clone()).unwrap();
    for description in descriptions {
        establisher.describe(&description);
        cluster.update(description);
    }
    (cluster, establisher)
}
