pub(crate) mod server_selection;

use std::{collections::HashMap, fmt, time::Duration};

use serde::Deserialize;

use crate::{
    options::{ClusterOptions, ServerAddress},
    sdam::description::server::{ServerDescription, ServerType},
};

/// The possible types for a cluster.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum ClusterType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded cluster.
    Sharded,

    /// A cluster whose type is not known yet.
    #[default]
    Unknown,
}

/// Whether the deployment supports logical sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SessionSupportStatus {
    /// It is not known yet whether the deployment supports sessions, because no data-bearing
    /// server has been described.
    #[default]
    Undetermined,

    /// Sessions are not supported.
    Unsupported,

    /// Sessions are supported, expiring after the given idle timeout.
    Supported { logical_session_timeout: Duration },
}

/// A snapshot of the descriptions of every known member of the cluster.
#[derive(Debug, Clone)]
pub(crate) struct ClusterDescription {
    pub(crate) cluster_type: ClusterType,
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
    pub(crate) local_threshold: Duration,
}

impl ClusterDescription {
    pub(crate) fn new(options: &ClusterOptions) -> Self {
        let servers = options
            .hosts
            .iter()
            .map(|address| (address.clone(), ServerDescription::new(address.clone())))
            .collect();

        Self {
            cluster_type: ClusterType::Unknown,
            servers,
            local_threshold: options.local_threshold(),
        }
    }

    /// Replaces the stored description for the server's address, inserting it if the address
    /// wasn't known.
    pub(crate) fn update(&mut self, description: ServerDescription) {
        self.servers
            .insert(description.address.clone(), description);
        self.cluster_type = self.derive_cluster_type();
    }

    pub(crate) fn remove(&mut self, address: &ServerAddress) -> Option<ServerDescription> {
        let removed = self.servers.remove(address);
        self.cluster_type = self.derive_cluster_type();
        removed
    }

    pub(crate) fn get_server_description(
        &self,
        address: &ServerAddress,
    ) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub(crate) fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    fn derive_cluster_type(&self) -> ClusterType {
        let described = || self.servers.values().filter(|s| s.ok && s.is_available());

        if described().any(|s| s.server_type == ServerType::Standalone) {
            ClusterType::Single
        } else if described().any(|s| s.server_type == ServerType::Mongos) {
            ClusterType::Sharded
        } else if described().any(|s| s.server_type == ServerType::RsPrimary) {
            ClusterType::ReplicaSetWithPrimary
        } else if described().next().is_some() {
            ClusterType::ReplicaSetNoPrimary
        } else {
            ClusterType::Unknown
        }
    }

    /// Sessions are supported when every data-bearing server reports a logical session timeout;
    /// the cluster-wide timeout is the smallest one reported.
    pub(crate) fn session_support_status(&self) -> SessionSupportStatus {
        let mut data_bearing = self
            .servers
            .values()
            .filter(|s| s.is_selectable() && s.server_type.is_data_bearing())
            .peekable();

        if data_bearing.peek().is_none() {
            return SessionSupportStatus::Undetermined;
        }

        let mut min_timeout: Option<Duration> = None;
        for server in data_bearing {
            match server.logical_session_timeout {
                Some(timeout) => {
                    min_timeout = Some(min_timeout.map_or(timeout, |min| min.min(timeout)));
                }
                None => return SessionSupportStatus::Unsupported,
            }
        }

        match min_timeout {
            Some(logical_session_timeout) => SessionSupportStatus::Supported {
                logical_session_timeout,
            },
            None => SessionSupportStatus::Unsupported,
        }
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}, Servers: [ ", self.cluster_type)?;

        let mut servers: Vec<_> = self.servers.values().collect();
        servers.sort_by(|a, b| a.address.cmp(&b.address));
        for server in servers {
            write!(
                f,
                "{{ Address: {}, Type: {}, State: {}, Ok: {} }}, ",
                server.address, server.server_type, server.state, server.ok
            )?;
        }

        write!(f, "] }}")
    }
}
