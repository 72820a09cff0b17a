//! This crate contains the execution core of a MongoDB client: the layer that turns a logical
//! read or write into a command sent to a suitably selected server, retries retryable writes
//! once against a freshly selected server, and keeps server leases, pooled connections and
//! logical sessions correctly acquired and released. It uses the [`bson`] crate for BSON
//! support.
//!
//! The wire protocol is not part of this crate. Connections are opened through a
//! [`ConnectionEstablisher`] supplied by the caller, and server descriptions are fed to the
//! [`Cluster`] from outside via [`Cluster::update`].
//!
//! # Example
//!
//! ```no_run
//! # use mongodb_executor::{
//! #     bson::doc, error::Result, operation::RunCommand, options::ClusterOptions,
//! #     ConnectionEstablisher, Cluster, OperationExecutor, ReadPreference,
//! # };
//! # async fn run(establisher: impl ConnectionEstablisher + 'static) -> Result<()> {
//! let cluster = Cluster::new(ClusterOptions::default(), establisher)?;
//! let executor = OperationExecutor::new(cluster);
//!
//! let reply = executor
//!     .execute_read(
//!         &RunCommand::new("admin", doc! { "ping": 1 })?,
//!         ReadPreference::Primary,
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The blocking API in [`sync`] mirrors the asynchronous one. It is enabled by the `sync` feature,
//! which is on by default.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

mod binding;
mod bson_util;
mod cmap;
pub mod error;
mod executor;
pub mod operation;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
mod session;
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;
mod trace;

pub use crate::{
    binding::{ClusterBinding, ConnectionSource, ReadBinding, WriteBinding},
    cmap::{
        establish::ConnectionEstablisher,
        Command,
        CommandResponse,
        Connection,
        ConnectionDescription,
        PoolStatus,
        PooledConnection,
    },
    executor::OperationExecutor,
    sdam::{
        can_retry_write,
        Cluster,
        ClusterType,
        ServerConnectionState,
        ServerDescription,
        ServerType,
    },
    selection_criteria::{ReadPreference, ReadPreferenceOptions, SelectionCriteria, TagSet},
    session::{ClientSession, SessionContext, TransactionOptions, TransactionState},
};
