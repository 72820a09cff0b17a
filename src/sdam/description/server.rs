use std::time::Duration;

use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::oid::ObjectId,
    options::ServerAddress,
    selection_criteria::TagSet,
};

/// The minimum wire version at which a server supports retryable writes.
pub(crate) const RETRYABLE_WRITES_MIN_WIRE_VERSION: i32 = 6;

/// Enum representing the possible types of servers that can be part of a cluster.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the replica
    /// set config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A server that the cluster has not been able to describe yet.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
        )
    }

    /// Whether this server belongs to a deployment that supports retrying writes, i.e. a replica
    /// set member or a router.
    pub(crate) fn is_retry_capable(self) -> bool {
        !matches!(self, ServerType::Standalone | ServerType::Unknown)
    }
}

/// The observed connection state of a server.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum ServerConnectionState {
    /// The server has replied to the cluster and can be used.
    #[default]
    Connected,

    /// A connection to the server is being established.
    Connecting,

    /// Nothing is known about the server's reachability.
    Unknown,
}

/// An immutable snapshot of one cluster member's observed state. A fresh description replaces
/// the previous one for its address wholesale.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ServerDescription {
    /// The address of the server.
    #[builder(!default)]
    pub address: ServerAddress,

    /// The role the server plays in the deployment.
    pub server_type: ServerType,

    /// Whether the last check of the server succeeded. Descriptions that aren't ok are never
    /// selected.
    #[builder(default = true)]
    pub ok: bool,

    /// The server's connection state.
    pub state: ServerConnectionState,

    /// The data-bearing members of the replica set this server reports.
    pub hosts: Vec<ServerAddress>,

    /// The passive members of the replica set this server reports.
    pub passives: Vec<ServerAddress>,

    /// The name of the replica set the server belongs to, if any.
    pub set_name: Option<String>,

    /// The election id reported by a primary.
    pub election_id: Option<ObjectId>,

    /// The replica set config version reported by the server.
    pub set_version: Option<i32>,

    /// The maximum wire protocol version the server supports.
    pub max_wire_version: i32,

    /// The most recent round trip time measured to this server.
    pub round_trip_time: Option<Duration>,

    /// How long the server keeps an idle logical session alive. Absent when the server doesn't
    /// support sessions.
    pub logical_session_timeout: Option<Duration>,

    /// The replica set tags of this server.
    pub tags: TagSet,
}

impl ServerDescription {
    /// Creates the placeholder description for a seed that has not been described yet.
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            ok: false,
            state: ServerConnectionState::Connecting,
            hosts: Vec::new(),
            passives: Vec::new(),
            set_name: None,
            election_id: None,
            set_version: None,
            max_wire_version: 0,
            round_trip_time: None,
            logical_session_timeout: None,
            tags: TagSet::new(),
        }
    }

    /// Whether this server is "available": it has been described as something other than
    /// `Unknown`.
    pub(crate) fn is_available(&self) -> bool {
        !matches!(self.server_type, ServerType::Unknown)
    }

    /// Whether this server may be returned from server selection.
    pub(crate) fn is_selectable(&self) -> bool {
        self.ok && self.state == ServerConnectionState::Connected && self.is_available()
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, val)| self.tags.get(key) == Some(val))
    }

    /// Whether a write that failed elsewhere may be retried on this server.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.server_type.is_retry_capable()
            && self.logical_session_timeout.is_some()
            && self.max_wire_version >= RETRYABLE_WRITES_MIN_WIRE_VERSION
    }
}
