use std::{sync::Arc, time::Instant};

use derive_where::derive_where;
use tokio::sync::OwnedSemaphorePermit;

use super::{
    command::{Command, CommandResponse},
    Connection,
    ConnectionDescription,
};
use crate::{
    bson::Document,
    cmap::PoolInner,
    error::{Error, Result},
    session::SessionContext,
    trace::{TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

/// A connection checked out of a connection pool. The connection is checked back into its pool
/// when this value is dropped; a connection that saw a network error is closed instead.
#[derive_where(Debug)]
pub struct PooledConnection {
    connection: Option<Box<dyn Connection>>,

    description: ConnectionDescription,

    /// Set once the connection has seen a network error and must not be reused.
    broken: bool,

    #[derive_where(skip)]
    pool: Arc<PoolInner>,

    /// The pool capacity this connection occupies. Released after the connection is checked in.
    #[derive_where(skip)]
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    pub(crate) fn new(
        connection: Box<dyn Connection>,
        pool: Arc<PoolInner>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            description: connection.description().clone(),
            connection: Some(connection),
            broken: false,
            pool,
            permit: Some(permit),
        }
    }

    /// The description of the server this connection is established to.
    pub fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    /// The id the pool assigned to this connection.
    pub fn id(&self) -> u32 {
        self.description.connection_id
    }

    #[cfg(test)]
    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends `command`, attaching the session id if `session` carries one, and returns the reply
    /// document. Replies with `ok: 0` are turned into command errors.
    ///
    /// A network error marks both this connection and the session's server session as unusable.
    pub async fn command(
        &mut self,
        mut command: Command,
        session: &SessionContext,
    ) -> Result<Document> {
        if let Some(session_id) = session.session_id() {
            command.set_session(&session_id);
        }
        command.set_read_preference_for(self.description.server_type)?;

        let command_name = command.name.clone();
        let database = command.target_db.clone();
        let address = self.description.server_address.clone();
        let connection_id = self.id();

        if tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            tracing::debug!(
                target: COMMAND_TRACING_EVENT_TARGET,
                command = command.body.tracing_representation(),
                databaseName = database.as_str(),
                commandName = command_name.as_str(),
                serverHost = address.host.as_str(),
                serverPort = address.port_or_default(),
                driverConnectionId = connection_id,
                "Command started"
            );
        }

        let start_time = Instant::now();
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::internal("connection used after being checked in"))?;
        let result = connection
            .send_command(command)
            .await
            .and_then(CommandResponse::validate);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    commandName = command_name.as_str(),
                    serverHost = address.host.as_str(),
                    serverPort = address.port_or_default(),
                    driverConnectionId = connection_id,
                    durationMS = duration_ms,
                    "Command succeeded"
                );
                Ok(reply)
            }
            Err(error) => {
                if error.is_network_error() {
                    self.broken = true;
                    session.mark_dirty();
                }
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    commandName = command_name.as_str(),
                    serverHost = address.host.as_str(),
                    serverPort = address.port_or_default(),
                    driverConnectionId = connection_id,
                    durationMS = duration_ms,
                    failure = error.tracing_representation(),
                    "Command failed"
                );
                Err(error)
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.check_in(connection, self.broken);
        }
        // Capacity is released only once the connection is idle again.
        drop(self.permit.take());
    }
}
