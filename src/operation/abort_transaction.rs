use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    binding::WriteBinding,
    bson::doc,
    cmap::{Command, ConnectionDescription},
    error::{ErrorKind, Result},
    operation::{
        append_transaction_fields,
        execute_retryable_command,
        DocumentDecoder,
        WriteConcernErrorTransformer,
        WriteOperation,
    },
    sdam::ServerDescription,
    session::TransactionState,
};

/// Aborts the transaction in progress on the binding's session.
///
/// Like [`CommitTransaction`](super::CommitTransaction), `abortTransaction` is retried once on a
/// retryable error. The session's transaction is marked aborted whether or not the server
/// acknowledged the abort.
#[derive(Debug, Clone, Default)]
pub struct AbortTransaction {}

impl AbortTransaction {
    const NAME: &'static str = "abortTransaction";

    /// Creates the operation.
    pub fn new() -> Self {
        Self {}
    }
}

impl WriteOperation for AbortTransaction {
    type Output = ();

    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding) -> BoxFuture<'a, Result<()>> {
        async move {
            let session = binding.session_context();
            let client_session = session.session().ok_or_else(|| ErrorKind::Transaction {
                message: "no session to abort a transaction on".into(),
            })?;

            match client_session.transaction_state() {
                TransactionState::Starting => {
                    client_session.mark_aborted();
                    return Ok(());
                }
                TransactionState::InProgress => {}
                TransactionState::Aborted => {
                    return Err(ErrorKind::Transaction {
                        message: "cannot call abortTransaction twice".into(),
                    }
                    .into())
                }
                _ => {
                    return Err(ErrorKind::Transaction {
                        message: "no transaction started".into(),
                    }
                    .into())
                }
            }

            let creator =
                |_: &ServerDescription, _: &ConnectionDescription| -> Result<Command> {
                    let mut body = doc! { Self::NAME: 1 };
                    append_transaction_fields(&mut body, session);
                    Ok(Command::new("admin", body))
                };

            let result = execute_retryable_command(
                binding,
                &creator,
                &DocumentDecoder,
                &WriteConcernErrorTransformer,
            )
            .await;
            client_session.mark_aborted();
            result.map(|_| ())
        }
        .boxed()
    }
}
