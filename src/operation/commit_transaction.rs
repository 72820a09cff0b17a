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

/// Commits the transaction in progress on the binding's session.
///
/// `commitTransaction` is retried once on a retryable error regardless of whether it carries a
/// transaction number. A transaction that never sent a command is committed without contacting
/// the server.
#[derive(Debug, Clone, Default)]
pub struct CommitTransaction {}

impl CommitTransaction {
    const NAME: &'static str = "commitTransaction";

    /// Creates the operation.
    pub fn new() -> Self {
        Self {}
    }
}

impl WriteOperation for CommitTransaction {
    type Output = ();

    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding) -> BoxFuture<'a, Result<()>> {
        async move {
            let session = binding.session_context();
            let client_session = session.session().ok_or_else(|| ErrorKind::Transaction {
                message: "no session to commit a transaction on".into(),
            })?;

            match client_session.transaction_state() {
                TransactionState::Starting => {
                    client_session.mark_committed();
                    return Ok(());
                }
                TransactionState::InProgress | TransactionState::Committed => {}
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

            execute_retryable_command(
                binding,
                &creator,
                &DocumentDecoder,
                &WriteConcernErrorTransformer,
            )
            .await?;
            client_session.mark_committed();
            Ok(())
        }
        .boxed()
    }
}
