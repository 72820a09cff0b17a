use serde::Deserialize;

use crate::{
    bson::{Bson, Document},
    bson_util,
    error::{CommandError, Error, ErrorKind, Result},
    options::ServerAddress,
    sdam::ServerType,
    selection_criteria::ReadPreference,
};

/// `Command` is a client side abstraction of a server command: a document addressed to a
/// database, plus the read preference it was routed with.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Command {
    /// The name of the command, i.e. the first key of its body.
    pub name: String,

    /// The database the command runs against.
    pub target_db: String,

    /// The read preference the command was routed with, if it is a read.
    pub read_preference: Option<ReadPreference>,

    /// The command document.
    pub body: Document,
}

impl Command {
    /// Constructs a new command. The command's name is taken from the first key of `body`.
    pub fn new(target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: bson_util::first_key(&body).unwrap_or_default().to_string(),
            target_db: target_db.into(),
            read_preference: None,
            body,
        }
    }

    /// Constructs a read command.
    pub fn new_read(
        target_db: impl Into<String>,
        body: Document,
        read_preference: impl Into<Option<ReadPreference>>,
    ) -> Self {
        Self {
            read_preference: read_preference.into(),
            ..Self::new(target_db, body)
        }
    }

    pub(crate) fn set_session(&mut self, session_id: &Document) {
        self.body.insert("lsid", session_id.clone());
    }

    /// Whether the command carries a transaction number, making it a retryable write.
    pub fn has_txn_number(&self) -> bool {
        self.body.contains_key("txnNumber")
    }

    /// Routers need to be told the read preference explicitly; other server types get it
    /// through server selection alone.
    pub(crate) fn set_read_preference_for(&mut self, server_type: ServerType) -> Result<()> {
        if server_type != ServerType::Mongos {
            return Ok(());
        }
        match self.read_preference {
            Some(ref read_pref) if !read_pref.is_primary() => {
                let read_pref = crate::bson::to_document(read_pref)?;
                self.body.insert("$readPreference", read_pref);
            }
            _ => {}
        }
        Ok(())
    }
}

/// The reply to a [`Command`], along with the address of the server that sent it.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct CommandResponse {
    /// The server that sent the reply.
    pub source: ServerAddress,

    /// The reply document.
    pub body: Document,
}

#[derive(Deserialize)]
struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    command_error: CommandError,
}

impl CommandResponse {
    /// Creates a response from a reply document.
    pub fn new(source: ServerAddress, body: Document) -> Self {
        Self { source, body }
    }

    /// Returns whether this response indicates a success or not (i.e. if "ok: 1")
    pub(crate) fn is_success(&self) -> bool {
        bson_util::is_ok(&self.body)
    }

    /// Returns the reply document if it indicates success, or the command error it describes.
    pub(crate) fn validate(self) -> Result<Document> {
        if self.is_success() {
            return Ok(self.body);
        }

        let error_body: CommandErrorBody = crate::bson::from_bson(Bson::Document(self.body))
            .map_err(|_| Error::invalid_response("invalid server response"))?;
        Err(Error::new(
            ErrorKind::Command(error_body.command_error),
            error_body.error_labels,
        ))
    }
}
