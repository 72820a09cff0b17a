pub(crate) mod command;
mod pooled;

use std::{fmt::Debug, time::Duration};

use futures_util::future::BoxFuture;
use typed_builder::TypedBuilder;

use crate::{error::Result, options::ServerAddress, sdam::ServerType};

pub use self::pooled::PooledConnection;
use self::command::{Command, CommandResponse};

/// An established connection to a server.
///
/// The wire protocol is outside of this crate: implementations send one command and hand back
/// its reply, reporting transport failures as [`ErrorKind::Io`](crate::error::ErrorKind::Io)
/// errors so that they are classified as network errors.
pub trait Connection: Send + Sync + Debug {
    /// Information about the server this connection is established to, as learned during the
    /// connection handshake.
    fn description(&self) -> &ConnectionDescription;

    /// Sends `command` and waits for its reply.
    fn send_command(&mut self, command: Command) -> BoxFuture<'_, Result<CommandResponse>>;
}

/// Contains information about a given server in a format digestible by a connection.
#[derive(Debug, Default, Clone, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ConnectionDescription {
    /// The address of the server.
    #[builder(!default)]
    pub server_address: ServerAddress,

    /// The type of the server when the handshake occurred.
    pub server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub max_wire_version: i32,

    /// How long sessions started on this server will stay alive without
    /// executing an operation before the server kills them.
    pub logical_session_timeout: Option<Duration>,

    /// The id the pool assigned to the connection.
    pub connection_id: u32,
}
