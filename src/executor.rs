#[cfg(test)]
mod test;

use crate::{
    binding::ClusterBinding,
    error::{
        Error,
        ErrorKind,
        Result,
        TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    operation::{ReadOperation, WriteOperation},
    runtime,
    sdam::Cluster,
    selection_criteria::ReadPreference,
    session::{ClientSession, SessionContext},
};

/// Executes operations against a [`Cluster`].
///
/// Each execution gets its own [`ClusterBinding`]. When the caller doesn't supply a session the
/// binding starts an implicit one, which is ended once the operation completes. Errors raised
/// while the session has an active transaction are labeled for the transaction retry logic above
/// this layer.
#[derive(Clone, Debug)]
pub struct OperationExecutor {
    cluster: Cluster,
}

impl OperationExecutor {
    /// Creates an executor for `cluster`.
    pub fn new(cluster: Cluster) -> Self {
        Self { cluster }
    }

    /// The cluster operations are executed against.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Executes a read routed with `read_preference`.
    ///
    /// A read in a transaction must use a primary read preference; any other preference is
    /// rejected before a server is selected.
    pub async fn execute_read<O: ReadOperation>(
        &self,
        operation: &O,
        read_preference: ReadPreference,
        session: Option<&ClientSession>,
    ) -> Result<O::Output> {
        if let Some(session) = session {
            if session.in_transaction() && !read_preference.is_primary() {
                return Err(ErrorKind::InvalidReadPreferenceInTransaction {
                    read_preference: read_preference.to_string(),
                }
                .into());
            }
        }

        let binding = ClusterBinding::new(&self.cluster, read_preference, session.cloned()).await?;
        operation
            .execute(&binding)
            .await
            .map_err(|error| label_transient_transaction_error(error, binding.session_context()))
    }

    /// Executes a write on the primary.
    pub async fn execute_write<O: WriteOperation>(
        &self,
        operation: &O,
        session: Option<&ClientSession>,
    ) -> Result<O::Output> {
        let binding =
            ClusterBinding::new(&self.cluster, ReadPreference::Primary, session.cloned()).await?;
        operation
            .execute(&binding)
            .await
            .map_err(|error| label_transient_transaction_error(error, binding.session_context()))
    }

    /// Executes a read as a background task and calls `callback` with its result exactly once.
    pub fn execute_read_with_callback<O, F>(
        &self,
        operation: O,
        read_preference: ReadPreference,
        session: Option<ClientSession>,
        callback: F,
    ) where
        O: ReadOperation + 'static,
        F: FnOnce(Result<O::Output>) + Send + 'static,
    {
        let executor = self.clone();
        // The task is detached; completion is reported only through the callback.
        drop(runtime::spawn(async move {
            let result = executor
                .execute_read(&operation, read_preference, session.as_ref())
                .await;
            callback(result);
        }));
    }

    /// Executes a write as a background task and calls `callback` with its result exactly once.
    pub fn execute_write_with_callback<O, F>(
        &self,
        operation: O,
        session: Option<ClientSession>,
        callback: F,
    ) where
        O: WriteOperation + 'static,
        F: FnOnce(Result<O::Output>) + Send + 'static,
    {
        let executor = self.clone();
        drop(runtime::spawn(async move {
            let result = executor.execute_write(&operation, session.as_ref()).await;
            callback(result);
        }));
    }
}

/// Adds the `TransientTransactionError` label to a network or timeout error raised while the
/// session has an active transaction, unless the commit result is already marked unknown.
pub(crate) fn label_transient_transaction_error(
    mut error: Error,
    session: &SessionContext,
) -> Error {
    if session.has_active_transaction()
        && (error.is_network_error() || error.is_timeout())
        && !error.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    {
        error.add_label(TRANSIENT_TRANSACTION_ERROR);
    }
    error
}
