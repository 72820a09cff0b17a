//! Operations and the pieces the command executor is assembled from: decoders that parse a
//! reply, transformers that post-process the decoded value, and command creators that build the
//! command for each attempt.

mod abort_transaction;
pub(crate) mod command;
mod commit_transaction;
mod drop_collection;
mod drop_user;
mod insert;
mod run_command;


use std::marker::PhantomData;

use futures_util::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    binding::{ReadBinding, WriteBinding},
    bson::{Bson, Document},
    cmap::{Command, ConnectionDescription},
    error::{Error, ErrorKind, Result, WriteConcernError, WriteFailure},
    options::ServerAddress,
    sdam::{can_retry_write, ServerDescription},
    session::{SessionContext, TransactionState},
};

pub use self::{
    abort_transaction::AbortTransaction,
    command::{
        execute_read_command,
        execute_retryable_command,
        execute_write_command,
        is_retryable_command,
        should_attempt_to_retry,
    },
    commit_transaction::CommitTransaction,
    drop_collection::DropCollection,
    drop_user::DropUser,
    insert::{Insert, InsertResult},
    run_command::RunCommand,
};

/// An operation that reads through a [`ReadBinding`].
pub trait ReadOperation: Send + Sync {
    /// The output type of this operation.
    type Output: Send;

    /// Executes the operation, acquiring every connection it needs from `binding`.
    fn execute<'a>(&'a self, binding: &'a dyn ReadBinding) -> BoxFuture<'a, Result<Self::Output>>;
}

/// An operation that writes through a [`WriteBinding`].
pub trait WriteOperation: Send + Sync {
    /// The output type of this operation.
    type Output: Send;

    /// Executes the operation, acquiring every connection it needs from `binding`.
    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding)
        -> BoxFuture<'a, Result<Self::Output>>;
}

/// Parses a successful reply.
pub trait Decoder: Send + Sync {
    /// The decoded type.
    type Output;

    /// Decodes `reply`. Failures are reported as deserialization errors and are never retried.
    fn decode(&self, reply: Document) -> Result<Self::Output>;
}

/// Hands back the reply document as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentDecoder;

impl Decoder for DocumentDecoder {
    type Output = Document;

    fn decode(&self, reply: Document) -> Result<Document> {
        Ok(reply)
    }
}

/// Deserializes the reply into `T`.
#[derive(Debug)]
pub struct DeserializeDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> DeserializeDecoder<T> {
    /// Creates a decoder for `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for DeserializeDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DeserializeDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for DeserializeDecoder<T> {
    type Output = T;

    fn decode(&self, reply: Document) -> Result<T> {
        Ok(crate::bson::from_document(reply)?)
    }
}

/// Post-processes a decoded reply along with the address of the server that sent it.
///
/// An error returned here is classified exactly like an error sending the command, so a
/// transformer that surfaces a retryable write concern error makes the command retry.
pub trait CommandTransformer<D>: Send + Sync {
    /// The type the transformer produces.
    type Output;

    /// Transforms `decoded`.
    fn apply(&self, decoded: D, source: &ServerAddress) -> Result<Self::Output>;
}

impl<D, R, F> CommandTransformer<D> for F
where
    F: Fn(D, &ServerAddress) -> Result<R> + Send + Sync,
{
    type Output = R;

    fn apply(&self, decoded: D, source: &ServerAddress) -> Result<R> {
        self(decoded, source)
    }
}

/// Returns the decoded value unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransformer;

impl<D> CommandTransformer<D> for IdentityTransformer {
    type Output = D;

    fn apply(&self, decoded: D, _source: &ServerAddress) -> Result<D> {
        Ok(decoded)
    }
}

/// Turns a `writeConcernError` embedded in an otherwise successful reply into an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteConcernErrorTransformer;

/// Body of a write response that could possibly have a write concern error but not write errors.
#[derive(Debug, Deserialize, Default, Clone)]
struct WriteConcernOnlyBody {
    #[serde(rename = "writeConcernError")]
    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

impl WriteConcernOnlyBody {
    fn validate(self) -> Result<()> {
        match self.write_concern_error {
            Some(wc_error) => Err(Error::new(
                ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)),
                self.labels,
            )),
            None => Ok(()),
        }
    }
}

impl CommandTransformer<Document> for WriteConcernErrorTransformer {
    type Output = Document;

    fn apply(&self, decoded: Document, _source: &ServerAddress) -> Result<Document> {
        let body: WriteConcernOnlyBody = crate::bson::from_bson(Bson::Document(decoded.clone()))?;
        body.validate()?;
        Ok(decoded)
    }
}

/// Builds the command for one attempt from the description of the server and connection the
/// attempt was assigned. Called once per attempt.
pub trait CommandCreator: Send + Sync {
    /// Creates the command.
    fn create(
        &self,
        server: &ServerDescription,
        connection: &ConnectionDescription,
    ) -> Result<Command>;
}

impl<F> CommandCreator for F
where
    F: Fn(&ServerDescription, &ConnectionDescription) -> Result<Command> + Send + Sync,
{
    fn create(
        &self,
        server: &ServerDescription,
        connection: &ConnectionDescription,
    ) -> Result<Command> {
        self(server, connection)
    }
}

/// Returns `default` in place of a namespace-not-found failure.
pub fn ignore_ns_not_found<T>(result: Result<T>, default: T) -> Result<T> {
    match result {
        Err(error) if error.is_ns_not_found() => Ok(default),
        other => other,
    }
}

/// Adds the session fields a write needs to `body`.
///
/// Inside a transaction the command carries the transaction's number and `autocommit: false`, and
/// the first command of the transaction also starts it. Outside of one, a new transaction number
/// is allocated only if the attempt's server and connection can retry writes.
pub(crate) fn append_session_fields(
    body: &mut Document,
    server: &ServerDescription,
    connection: &ConnectionDescription,
    session: &SessionContext,
) {
    if session.has_active_transaction() {
        if let Some(txn_number) = session.txn_number() {
            body.insert("txnNumber", txn_number);
        }
        if let Some(client_session) = session.session() {
            if client_session.transaction_state() == TransactionState::Starting {
                body.insert("startTransaction", true);
                client_session.mark_in_progress();
            }
        }
        body.insert("autocommit", false);
    } else if can_retry_write(server, connection, session) {
        if let Some(txn_number) = session.advance_txn_number() {
            body.insert("txnNumber", txn_number);
        }
    }
}

/// Adds the fields a `commitTransaction` or `abortTransaction` command carries.
pub(crate) fn append_transaction_fields(body: &mut Document, session: &SessionContext) {
    if let Some(txn_number) = session.txn_number() {
        body.insert("txnNumber", txn_number);
    }
    body.insert("autocommit", false);
}
