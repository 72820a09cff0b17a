use futures_util::future::{BoxFuture, FutureExt};

use crate::{
    binding::WriteBinding,
    bson::doc,
    error::Result,
    operation::{
        execute_write_command,
        ignore_ns_not_found,
        DocumentDecoder,
        WriteConcernErrorTransformer,
        WriteOperation,
    },
};

/// Drops a collection. Dropping a collection that doesn't exist succeeds.
#[derive(Debug, Clone)]
pub struct DropCollection {
    db: String,
    coll: String,
}

impl DropCollection {
    const NAME: &'static str = "drop";

    /// Creates an operation dropping `db.coll`.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl WriteOperation for DropCollection {
    type Output = ();

    fn execute<'a>(&'a self, binding: &'a dyn WriteBinding) -> BoxFuture<'a, Result<()>> {
        async move {
            let result = execute_write_command(
                binding,
                &self.db,
                doc! { Self::NAME: self.coll.as_str() },
                &DocumentDecoder,
                &WriteConcernErrorTransformer,
            )
            .await
            .map(|_| ());
            ignore_ns_not_found(result, ())
        }
        .boxed()
    }
}
