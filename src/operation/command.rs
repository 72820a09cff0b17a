//! Sending a command through a binding, including the single retry a retryable write gets.

use crate::{
    binding::{ConnectionSource, ReadBinding, WriteBinding},
    bson::Document,
    cmap::{Command, PooledConnection},
    error::{Error, Result},
    operation::{CommandCreator, CommandTransformer, Decoder},
    sdam::can_retry_write,
    trace::{TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

const COMMIT_TRANSACTION: &str = "commitTransaction";
const ABORT_TRANSACTION: &str = "abortTransaction";

/// Sends a read command to a server selected by `binding`, then decodes and transforms the reply.
///
/// The connection is checked back in before the source is released, on every exit.
pub async fn execute_read_command<D, T>(
    binding: &dyn ReadBinding,
    database: &str,
    command: Document,
    decoder: &D,
    transformer: &T,
) -> Result<T::Output>
where
    D: Decoder,
    T: CommandTransformer<D::Output>,
{
    let source = binding.read_connection_source().await?;
    let mut connection = source.connection().await?;
    let command = Command::new_read(database, command, binding.read_preference());
    send_and_transform(&mut connection, &source, command, decoder, transformer).await
}

/// Sends a write command to the primary without retrying it.
pub async fn execute_write_command<D, T>(
    binding: &dyn WriteBinding,
    database: &str,
    command: Document,
    decoder: &D,
    transformer: &T,
) -> Result<T::Output>
where
    D: Decoder,
    T: CommandTransformer<D::Output>,
{
    let source = binding.write_connection_source().await?;
    let mut connection = source.connection().await?;
    let command = Command::new(database, command);
    send_and_transform(&mut connection, &source, command, decoder, transformer).await
}

/// Sends a write command built by `creator`, retrying it once on a freshly selected server if it
/// fails with a retryable error.
///
/// The command is built once, from the server and connection of the first attempt, and the same
/// command is sent on the retry. The first attempt's connection and source are released before
/// the retry selects a server. A retry only happens if the command is retry-eligible, the error
/// is retryable, and the newly selected server can retry writes; if the retry cannot be made or
/// fails, the error from the first attempt is returned.
pub async fn execute_retryable_command<C, D, T>(
    binding: &dyn WriteBinding,
    creator: &C,
    decoder: &D,
    transformer: &T,
) -> Result<T::Output>
where
    C: CommandCreator,
    D: Decoder,
    T: CommandTransformer<D::Output>,
{
    let (command, original_error) = {
        let source = binding.write_connection_source().await?;
        let mut connection = source.connection().await?;
        let command = creator.create(source.server_description(), connection.description())?;

        match send_and_transform(&mut connection, &source, command.clone(), decoder, transformer)
            .await
        {
            Ok(output) => return Ok(output),
            Err(error) => (command, error),
        }
    };

    if !should_attempt_to_retry(&command, &original_error) {
        return Err(original_error);
    }

    let source = match binding.write_connection_source().await {
        Ok(source) => source,
        Err(retry_error) => return Err(suppress(&command, original_error, retry_error)),
    };
    let mut connection = match source.connection().await {
        Ok(connection) => connection,
        Err(retry_error) => return Err(suppress(&command, original_error, retry_error)),
    };

    if !can_retry_write(
        source.server_description(),
        connection.description(),
        binding.session_context(),
    ) {
        tracing::debug!(
            target: COMMAND_TRACING_EVENT_TARGET,
            commandName = command.name.as_str(),
            serverHost = source.server_description().address.host.as_str(),
            serverPort = source.server_description().address.port_or_default(),
            "Retry abandoned: the selected server does not support retryable writes"
        );
        return Err(original_error);
    }

    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        commandName = command.name.as_str(),
        serverHost = source.server_description().address.host.as_str(),
        serverPort = source.server_description().address.port_or_default(),
        failure = original_error.tracing_representation(),
        "Retrying command"
    );

    let name = command.name.clone();
    match send_and_transform(&mut connection, &source, command, decoder, transformer).await {
        Ok(output) => Ok(output),
        Err(retry_error) => {
            tracing::debug!(
                target: COMMAND_TRACING_EVENT_TARGET,
                commandName = name.as_str(),
                failure = retry_error.tracing_representation(),
                "Retry failed; returning the error from the first attempt"
            );
            Err(original_error)
        }
    }
}

/// Whether a command that failed with `error` gets a second attempt, before considering the
/// server the retry would go to.
pub fn should_attempt_to_retry(command: &Command, error: &Error) -> bool {
    is_retryable_command(command) && error.is_retryable()
}

/// Whether `command` is eligible for a retry: it carries a transaction number, or it commits or
/// aborts a transaction.
pub fn is_retryable_command(command: &Command) -> bool {
    command.has_txn_number()
        || matches!(command.name.as_str(), COMMIT_TRANSACTION | ABORT_TRANSACTION)
}

fn suppress(command: &Command, original_error: Error, retry_error: Error) -> Error {
    tracing::debug!(
        target: COMMAND_TRACING_EVENT_TARGET,
        commandName = command.name.as_str(),
        failure = retry_error.tracing_representation(),
        "Could not acquire a connection for the retry; returning the error from the first attempt"
    );
    original_error
}

async fn send_and_transform<D, T>(
    connection: &mut PooledConnection,
    source: &ConnectionSource,
    command: Command,
    decoder: &D,
    transformer: &T,
) -> Result<T::Output>
where
    D: Decoder,
    T: CommandTransformer<D::Output>,
{
    let reply = connection
        .command(command, source.session_context())
        .await?;
    let decoded = decoder.decode(reply)?;
    transformer.apply(decoded, &connection.description().server_address)
}
