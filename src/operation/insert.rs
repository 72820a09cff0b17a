use futures_util::future::{BoxFuture, FutureExt};
use serde::Deserialize;

use crate::{
    binding::WriteBinding,
    bson::{doc, Document},
    cmap::{Command, ConnectionDescription},
    error::{Error, ErrorKind, Result, WriteConcernError, WriteError, WriteFailure},
    operation::{
        append_session_fields,
        execute_retryable_command,
        DeserializeDecoder,
        WriteOperation,
    },
    options::ServerAddress,
    sdam::ServerDescription,
};

/// Inserts documents into a collection as a retryable write.
///
/// The command carries a transaction number, and so is retried once on a retryable error, only
/// when the server and connection of the first attempt support retryable writes.
#[derive(Debug, Clone)]
pub struct Insert {
    db: String,
    coll: String,
    documents: Vec<Document>,
    ordered: bool,
}

/// The result of an [`Insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct InsertResult {
    /// The number of documents the server reported inserting.
    pub inserted_count: u64,
}

#[derive(Debug, Deserialize)]
struct InsertResponseBody {
    #[serde(default)]
    n: u64,

    #[serde(rename = "writeErrors")]
    write_errors: Option<Vec<WriteError>>,

    #[serde(rename = "writeConcernError")]
    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

impl Insert {
    const NAME: &'static str = "insert";

    /// Creates an operation inserting `documents` into `db.coll`.
    pub fn new(
        db: impl Into<String>,
        coll: impl Into<String>,
        documents: Vec<Document>,
    ) -> Result<Self> {
        if documents.is_empty() {
            return Err(Error::invalid_argument("no documents provided to insert"));
        }
        Ok(Self {
            db: db.into(),
            coll: coll.into(),
            documents,
            ordered: true,
        })
    }

    /// Sets whether the server stops at the first write error.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }
}

fn handle_response(body: InsertResponseBody, _source: &ServerAddress) -> Result<InsertResult> {
    if let Some(write_error) = body.write_errors.and_then(|errors| errors.into_iter().next()) {
        return Err(Error::new(
            ErrorKind::Write(WriteFailure::WriteError(write_error)),
            body.labels,
        ));
    }
    if let Some(wc_error) = body.write_concern_error {
        return Err(Error::new(
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)),
            body.labels,
        ));
    }
    Ok(InsertResult {
        inserted_count: body.n,
    })
}

impl WriteOperation for Insert {
    type Output = InsertResult;

    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding) -> BoxFuture<'a, Result<InsertResult>> {
        async move {
            let session = binding.session_context();
            let creator = |server: &ServerDescription,
                           connection: &ConnectionDescription|
             -> Result<Command> {
                let mut body = doc! {
                    Self::NAME: self.coll.as_str(),
                    "documents": self.documents.clone(),
                    "ordered": self.ordered,
                };
                append_session_fields(&mut body, server, connection, session);
                Ok(Command::new(self.db.as_str(), body))
            };

            execute_retryable_command(
                binding,
                &creator,
                &DeserializeDecoder::<InsertResponseBody>::new(),
                &handle_response,
            )
            .await
        }
        .boxed()
    }
}
