//! Cluster state: server descriptions, the servers they describe, and server selection.

mod description;
mod server;
mod topology;

pub use self::{
    description::{
        server::{ServerConnectionState, ServerDescription, ServerType},
        topology::ClusterType,
    },
    topology::{can_retry_write, Cluster},
};

pub(crate) use self::{
    description::topology::{
        server_selection::SelectedServer,
        ClusterDescription,
        SessionSupportStatus,
    },
    server::Server,
};
