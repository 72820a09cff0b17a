use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    binding::ReadBinding,
    bson::Document,
    bson_util,
    error::{Error, Result},
    operation::{execute_read_command, DocumentDecoder, IdentityTransformer, ReadOperation},
};

/// Runs an arbitrary command as a read and returns the reply document.
#[derive(Debug, Clone)]
pub struct RunCommand {
    db: String,
    command: Document,
}

impl RunCommand {
    /// Creates an operation running `command` against `db`. The command must not be empty.
    pub fn new(db: impl Into<String>, command: Document) -> Result<Self> {
        if bson_util::first_key(&command).is_none() {
            return Err(Error::invalid_argument(
                "an empty document cannot be passed to a run_command operation",
            ));
        }
        Ok(Self {
            db: db.into(),
            command,
        })
    }
}

impl ReadOperation for RunCommand {
    type Output = Document;

    fn execute<'a>(&'a self, binding: &'a dyn ReadBinding) -> BoxFuture<'a, Result<Document>> {
        execute_read_command(
            binding,
            &self.db,
            self.command.clone(),
            &DocumentDecoder,
            &IdentityTransformer,
        )
        .boxed()
    }
}
