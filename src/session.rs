//! Logical sessions, the transactions that run in them, and the per-operation session context
//! the executor threads through bindings and connections.

mod pool;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Deserialize;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document},
    error::{ErrorKind, Result},
    selection_criteria::ReadPreference,
};

pub(crate) use self::pool::ServerSessionPool;

/// A client-side handle to a logical session.
///
/// Clones refer to the same session. The underlying server session is returned to the session
/// pool when the session is ended or the last handle is dropped.
#[derive(Clone, Debug)]
pub struct ClientSession {
    inner: Arc<Mutex<SessionState>>,
}

#[derive(Debug)]
struct SessionState {
    /// Unset once the session has been ended.
    server_session: Option<ServerSession>,
    transaction: Transaction,
    is_implicit: bool,
    logical_session_timeout: Duration,
    pool: ServerSessionPool,
}

impl SessionState {
    fn end(&mut self) {
        if let Some(server_session) = self.server_session.take() {
            self.pool
                .check_in(server_session, self.logical_session_timeout);
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.end();
    }
}

/// The state of a transaction on a session.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum TransactionState {
    /// No transaction has been started on the session.
    #[default]
    None,

    /// A transaction was started but no command has been sent in it yet.
    Starting,

    /// A command has been sent as part of the transaction.
    InProgress,

    /// The transaction was committed.
    Committed,

    /// The transaction was aborted.
    Aborted,
}

/// Contains the options that can be used for a transaction.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, PartialEq)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TransactionOptions {
    /// The read preference that every read in the transaction is routed with. Reads in a
    /// transaction must go to the primary.
    pub read_preference: Option<ReadPreference>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Transaction {
    pub(crate) state: TransactionState,
    pub(crate) options: Option<TransactionOptions>,
}

impl Transaction {
    fn start(&mut self, options: Option<TransactionOptions>) {
        self.state = TransactionState::Starting;
        self.options = options;
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Starting | TransactionState::InProgress
        )
    }
}

impl ClientSession {
    pub(crate) fn new(
        server_session: ServerSession,
        pool: ServerSessionPool,
        logical_session_timeout: Duration,
        is_implicit: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                server_session: Some(server_session),
                transaction: Transaction::default(),
                is_implicit,
                logical_session_timeout,
                pool,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The id of the session, sent to the server as `lsid`. `None` once the session has ended.
    pub fn id(&self) -> Option<Document> {
        self.state()
            .server_session
            .as_ref()
            .map(|server_session| server_session.id.clone())
    }

    /// The current transaction number of this session.
    pub fn txn_number(&self) -> i64 {
        self.state()
            .server_session
            .as_ref()
            .map(|server_session| server_session.txn_number)
            .unwrap_or(0)
    }

    /// Increments the transaction number and returns the new value. Returns `None` if the
    /// session has ended.
    pub(crate) fn advance_txn_number(&self) -> Option<i64> {
        let mut state = self.state();
        let server_session = state.server_session.as_mut()?;
        server_session.txn_number += 1;
        Some(server_session.txn_number)
    }

    /// Whether this session was created by the executor on behalf of an operation rather than
    /// by the caller.
    pub fn is_implicit(&self) -> bool {
        self.state().is_implicit
    }

    /// Whether the session has ended.
    pub fn is_ended(&self) -> bool {
        self.state().server_session.is_none()
    }

    /// Whether a transaction is starting or in progress on this session.
    pub fn in_transaction(&self) -> bool {
        self.state().transaction.is_active()
    }

    /// The state of the session's current transaction.
    pub fn transaction_state(&self) -> TransactionState {
        self.state().transaction.state.clone()
    }

    /// The read preference configured for the current transaction, if one is active.
    pub fn transaction_read_preference(&self) -> Option<ReadPreference> {
        let state = self.state();
        if !state.transaction.is_active() {
            return None;
        }
        state
            .transaction
            .options
            .as_ref()
            .and_then(|options| options.read_preference.clone())
    }

    /// Starts a new transaction on this session, advancing the transaction number.
    pub fn start_transaction(
        &self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<()> {
        let mut state = self.state();
        if state.is_implicit {
            return Err(ErrorKind::Transaction {
                message: "cannot start a transaction on an implicit session".into(),
            }
            .into());
        }
        if state.transaction.is_active() {
            return Err(ErrorKind::Transaction {
                message: "transaction already in progress".into(),
            }
            .into());
        }
        let server_session = state.server_session.as_mut().ok_or_else(|| ErrorKind::Transaction {
            message: "cannot start a transaction on an ended session".into(),
        })?;
        server_session.txn_number += 1;
        state.transaction.start(options.into());
        Ok(())
    }

    /// Records that the first command of the transaction has been sent.
    pub fn mark_in_progress(&self) {
        let mut state = self.state();
        if state.transaction.state == TransactionState::Starting {
            state.transaction.state = TransactionState::InProgress;
        }
    }

    /// Records that the transaction has been committed.
    pub fn mark_committed(&self) {
        self.state().transaction.state = TransactionState::Committed;
    }

    /// Records that the transaction has been aborted.
    pub fn mark_aborted(&self) {
        self.state().transaction.state = TransactionState::Aborted;
    }

    /// Marks the server session as dirty so it is discarded instead of pooled when the session
    /// ends.
    pub(crate) fn mark_dirty(&self) {
        if let Some(server_session) = self.state().server_session.as_mut() {
            server_session.dirty = true;
        }
    }

    pub(crate) fn update_last_use(&self) {
        if let Some(server_session) = self.state().server_session.as_mut() {
            server_session.last_use = Instant::now();
        }
    }

    /// Ends the session, returning its server session to the pool. Ending a session twice has no
    /// effect.
    pub fn end(&self) {
        self.state().end();
    }
}

/// Client side abstraction of a server session. These are pooled and may be associated with
/// multiple `ClientSession`s over the course of their lifetime.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// The id of the server session to which this corresponds.
    pub(crate) id: Document,

    /// The last time an operation was executed with this session.
    last_use: Instant,

    /// Whether a network error was encountered while using this session.
    pub(crate) dirty: bool,

    /// A monotonically increasing transaction number for this session.
    txn_number: i64,
}

impl ServerSession {
    /// Creates a new session, generating the id client side.
    pub(crate) fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Determines if this server session is about to expire in a short amount of time (1 minute).
    pub(crate) fn is_about_to_expire(&self, logical_session_timeout: Duration) -> bool {
        let expiration_date = self.last_use + logical_session_timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}

/// The session-related state an operation executes with: the session, if there is one, and
/// whether retryable writes are enabled.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    session: Option<ClientSession>,
    retry_writes: bool,
}

impl SessionContext {
    /// Creates a context for the given session.
    pub fn new(session: impl Into<Option<ClientSession>>, retry_writes: bool) -> Self {
        Self {
            session: session.into(),
            retry_writes,
        }
    }

    /// Whether the context carries a session that hasn't ended.
    pub fn has_session(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| !session.is_ended())
            .unwrap_or(false)
    }

    /// The session, if there is one.
    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    /// The `lsid` to attach to outgoing commands.
    pub fn session_id(&self) -> Option<Document> {
        self.session.as_ref().and_then(ClientSession::id)
    }

    /// The session's current transaction number.
    pub fn txn_number(&self) -> Option<i64> {
        self.session.as_ref().map(ClientSession::txn_number)
    }

    /// Advances the session's transaction number for a new retryable write and returns it.
    pub fn advance_txn_number(&self) -> Option<i64> {
        self.session
            .as_ref()
            .and_then(ClientSession::advance_txn_number)
    }

    /// Whether the session has a transaction starting or in progress.
    pub fn has_active_transaction(&self) -> bool {
        self.session
            .as_ref()
            .map(ClientSession::in_transaction)
            .unwrap_or(false)
    }

    /// Whether retryable writes are enabled for this operation.
    pub fn retry_writes_enabled(&self) -> bool {
        self.retry_writes
    }

    /// The read preference pinned by the session's active transaction, if any.
    pub fn transaction_read_preference(&self) -> Option<ReadPreference> {
        self.session
            .as_ref()
            .and_then(ClientSession::transaction_read_preference)
    }

    pub(crate) fn mark_dirty(&self) {
        if let Some(ref session) = self.session {
            session.mark_dirty();
        }
    }

    pub(crate) fn update_last_use(&self) {
        if let Some(ref session) = self.session {
            session.update_last_use();
        }
    }
}
