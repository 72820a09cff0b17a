//! Contains the `Error` and `Result` types that `mongodb_executor` uses.


use std::{collections::HashSet, fmt, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::{bson::Document, options::ServerAddress};

/// Error codes that classify a failure as retryable regardless of its message.
pub(crate) const RETRYABLE_ERROR_CODES: [i32; 11] = [
    6, 7, 89, 91, 189, 9001, 13436, 13435, 11602, 11600, 10107,
];
const NOT_WRITABLE_PRIMARY_CODES: [i32; 2] = [10107, 13435];
const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Transient transaction error label. This label will be added to a network or timeout error
/// that occurs while a transaction is in progress, indicating that the entire transaction can be
/// retried.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// Unknown transaction commit result error label. This label will be added to an error returned
/// by a commit whose outcome could not be determined.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";

/// The result type for all methods that can return an error in the `mongodb_executor` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongodb_executor` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is boxed so that the error stays cheap to move, and
/// errors can be cloned so that the original failure of a retried command can be kept around.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Box::new(kind),
            labels,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl Into<String>) -> Error {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    /// Places the error into the category used by the retry and labeling logic.
    pub fn category(&self) -> ErrorCategory {
        match self.kind.as_ref() {
            ErrorKind::Io(..) => ErrorCategory::Network,
            ErrorKind::ServerSelection { .. } | ErrorKind::WaitQueueTimeout { .. } => {
                ErrorCategory::SelectionTimeout
            }
            ErrorKind::Write(WriteFailure::WriteConcernError(wc)) => {
                if is_not_writable_primary(wc.code, &wc.message) {
                    ErrorCategory::NotWritablePrimary
                } else if is_recovering(wc.code, &wc.message) {
                    ErrorCategory::NodeIsRecovering
                } else {
                    ErrorCategory::WriteConcern
                }
            }
            ErrorKind::Command(err) => {
                if is_not_writable_primary(err.code, &err.message) {
                    ErrorCategory::NotWritablePrimary
                } else if is_recovering(err.code, &err.message) {
                    ErrorCategory::NodeIsRecovering
                } else if is_ns_not_found(err.code, &err.message) {
                    ErrorCategory::NamespaceNotFound
                } else {
                    ErrorCategory::Application
                }
            }
            _ => ErrorCategory::Application,
        }
    }

    /// Whether this error is a network error.
    pub fn is_network_error(&self) -> bool {
        self.kind.is_network_error()
    }

    /// Whether this error resulted from a bounded wait expiring: server selection, connection
    /// checkout, or an I/O timeout.
    pub fn is_timeout(&self) -> bool {
        match self.kind.as_ref() {
            ErrorKind::ServerSelection { .. } | ErrorKind::WaitQueueTimeout { .. } => true,
            ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Whether a command that failed with this error may be retried against a freshly selected
    /// server.
    ///
    /// Network errors, "not writable primary" and "node is recovering" errors (by code or by the
    /// legacy message text), and errors whose code is in the retryable allow-list qualify. A
    /// write concern error is judged by its embedded code and message.
    pub fn is_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        let (code, message) = match self.kind.as_ref() {
            ErrorKind::Command(err) => (err.code, err.message.as_str()),
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_err)) => {
                (wc_err.code, wc_err.message.as_str())
            }
            _ => return false,
        };
        message.contains("not master")
            || message.contains("node is recovering")
            || RETRYABLE_ERROR_CODES.contains(&code)
    }

    /// Whether this error is an "ns not found" command error.
    pub fn is_ns_not_found(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Command(err) if is_ns_not_found(err.code, &err.message)
        )
    }

    /// Whether this error originated from a reply sent by the server.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Command(_) | ErrorKind::Write(_)
        )
    }

    /// Returns the server error code, if any.
    pub fn code(&self) -> Option<i32> {
        self.kind.code_and_message().map(|(code, _)| code)
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        self.labels.insert(label.as_ref().to_string());
    }

    /// Returns a copy of this error with the given label added.
    #[cfg(test)]
    pub(crate) fn with_label<T: AsRef<str>>(mut self, label: T) -> Self {
        self.add_label(label);
        self
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

/// The classes of failure the executor distinguishes between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// A transport-level failure. Always retryable.
    Network,

    /// The selected server is no longer a writable primary. Retryable.
    NotWritablePrimary,

    /// The selected server is recovering or shutting down. Retryable.
    NodeIsRecovering,

    /// The write succeeded but its write concern could not be satisfied.
    WriteConcern,

    /// The targeted namespace does not exist. Never retried; callers may treat it as benign.
    NamespaceNotFound,

    /// Any other application-level or validation failure. Never retried.
    Application,

    /// Server selection or connection checkout did not complete within its bounded wait.
    SelectionTimeout,
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An error occurred when trying to execute a write operation.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`].
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// A read inside a transaction was routed with a read preference other than primary.
    #[error("Read preference in a transaction must be primary, but was {read_preference}")]
    #[non_exhaustive]
    InvalidReadPreferenceInTransaction { read_preference: String },

    /// No suitable server could be selected within the server selection timeout.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The deployment does not support sessions.
    #[error("Attempted to start a session on a deployment that does not support sessions")]
    SessionsNotSupported,

    /// An error related to the transaction state of a session.
    #[error("{message}")]
    #[non_exhaustive]
    Transaction { message: String },

    /// Timed out while checking out a connection from a connection pool.
    #[error("Timed out while checking out a connection from connection pool with address {address}")]
    #[non_exhaustive]
    WaitQueueTimeout { address: ServerAddress },
}

impl ErrorKind {
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(self, ErrorKind::Io(..))
    }

    /// Gets the code/message tuple from this error, if applicable. In the case of write errors,
    /// the code and message are taken from the write concern error, if there is one.
    pub(crate) fn code_and_message(&self) -> Option<(i32, &str)> {
        match self {
            ErrorKind::Command(ref cmd_err) => Some((cmd_err.code, cmd_err.message.as_str())),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref wc_err)) => {
                Some((wc_err.code, wc_err.message.as_str()))
            }
            ErrorKind::Write(WriteFailure::WriteError(ref w_err)) => {
                Some((w_err.code, w_err.message.as_str()))
            }
            _ => None,
        }
    }

    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::Write(WriteFailure::WriteConcernError(err)) => Some(err),
            _ => None,
        }
    }
}

fn is_not_writable_primary(code: i32, message: &str) -> bool {
    if NOT_WRITABLE_PRIMARY_CODES.contains(&code) {
        return true;
    } else if is_recovering(code, message) {
        return false;
    }
    message.contains("not master")
}

fn is_recovering(code: i32, message: &str) -> bool {
    if RECOVERING_CODES.contains(&code) {
        return true;
    }
    message.contains("not master or secondary") || message.contains("node is recovering")
}

fn is_ns_not_found(code: i32, message: &str) -> bool {
    code == NAMESPACE_NOT_FOUND_CODE || message.contains("ns not found")
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl CommandError {
    pub(crate) fn new(code: i32, code_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: code_name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Error code {} ({}): {}", self.code, self.code_name, self.message)
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(alias = "errmsg", default = "String::new")]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,

    /// Labels categorizing the error.
    #[serde(rename = "errorLabels", default)]
    pub(crate) labels: Vec<String>,
}

/// An error that occurred during a write operation that wasn't due to being unable to satisfy a
/// write concern.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    ///
    /// Note that the server will not return this in some cases, hence `code_name` being an
    /// `Option`.
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

/// An error that occurred when trying to execute a write operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// An error that occurred due to not being able to satisfy a write concern.
    WriteConcernError(WriteConcernError),

    /// An error that occurred during a write operation that wasn't due to being unable to satisfy
    /// a write concern.
    WriteError(WriteError),
}
