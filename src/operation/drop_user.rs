use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    binding::WriteBinding,
    bson::doc,
    error::Result,
    operation::{
        execute_write_command,
        DocumentDecoder,
        WriteConcernErrorTransformer,
        WriteOperation,
    },
};

/// Removes a user from a database.
#[derive(Debug, Clone)]
pub struct DropUser {
    db: String,
    user: String,
}

impl DropUser {
    const NAME: &'static str = "dropUser";

    /// Creates an operation removing `user` from `db`.
    pub fn new(db: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            user: user.into(),
        }
    }
}

impl WriteOperation for DropUser {
    type Output = ();

    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding) -> BoxFuture<'a, Result<()>> {
        async move {
            execute_write_command(
                binding,
                &self.db,
                doc! { Self::NAME: self.user.as_str() },
                &DocumentDecoder,
                &WriteConcernErrorTransformer,
            )
            .await?;
            Ok(())
        }
        .boxed()
    }
}
