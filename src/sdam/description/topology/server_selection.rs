#[cfg(test)]
mod test;

use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

use super::{ClusterDescription, ClusterType};
use crate::{
    options::ServerAddress,
    sdam::{
        description::server::{ServerDescription, ServerType},
        Server,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

/// Struct encapsulating a selected server that handles the opcount accounting. The description
/// the server was selected with is kept alongside it.
#[derive(Debug)]
pub(crate) struct SelectedServer {
    server: Arc<Server>,
    description: ServerDescription,
}

impl SelectedServer {
    pub(crate) fn new(server: Arc<Server>, description: ServerDescription) -> Self {
        server.increment_operation_count();
        Self {
            server,
            description,
        }
    }

    pub(crate) fn description(&self) -> &ServerDescription {
        &self.description
    }
}

impl Clone for SelectedServer {
    fn clone(&self) -> Self {
        Self::new(self.server.clone(), self.description.clone())
    }
}

impl Deref for SelectedServer {
    type Target = Server;

    fn deref(&self) -> &Server {
        self.server.deref()
    }
}

impl Drop for SelectedServer {
    fn drop(&mut self) {
        self.server.decrement_operation_count();
    }
}

/// Attempt to select a server, returning None if no server could be selected
/// that matched the provided criteria.
pub(crate) fn attempt_to_select_server(
    criteria: &SelectionCriteria,
    cluster_description: &ClusterDescription,
    servers: &HashMap<ServerAddress, Arc<Server>>,
) -> Option<SelectedServer> {
    let in_window = cluster_description.suitable_servers_in_latency_window(criteria);

    in_window
        .into_iter()
        .filter_map(|desc| servers.get(&desc.address).map(|server| (server, desc)))
        .min_by(|(a, _), (b, _)| {
            a.operation_count()
                .cmp(&b.operation_count())
                .then_with(|| a.address.cmp(&b.address))
        })
        .map(|(server, desc)| SelectedServer::new(server.clone(), desc.clone()))
}

impl ClusterDescription {
    pub(crate) fn server_selection_timeout_error_message(
        &self,
        criteria: &SelectionCriteria,
    ) -> String {
        if self.has_available_servers() {
            format!(
                "Server selection timeout: None of the available servers suitable for criteria \
                 {criteria:?}. Cluster: {self}"
            )
        } else {
            format!("Server selection timeout: No available servers. Cluster: {self}")
        }
    }

    pub(crate) fn suitable_servers_in_latency_window<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
    ) -> Vec<&'a ServerDescription> {
        let mut suitable_servers = match criteria {
            SelectionCriteria::ReadPreference(ref read_pref) => self.suitable_servers(read_pref),
            SelectionCriteria::Predicate(ref filter) => self
                .selectable_servers()
                .filter(|s| {
                    // If we're connected to a standalone, ignore whether the single server in the
                    // cluster is data-bearing.
                    (self.cluster_type == ClusterType::Single || s.server_type.is_data_bearing())
                        && filter(s)
                })
                .collect(),
        };

        self.retain_servers_within_latency_window(&mut suitable_servers);

        suitable_servers
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_selectable())
    }

    fn selectable_servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values().filter(|server| server.is_selectable())
    }

    fn suitable_servers(&self, read_preference: &ReadPreference) -> Vec<&ServerDescription> {
        match self.cluster_type {
            ClusterType::Unknown => Vec::new(),
            ClusterType::Single => self
                .servers_with_type(&[ServerType::Standalone])
                .collect(),
            ClusterType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            ClusterType::ReplicaSetWithPrimary | ClusterType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)
            }
        }
    }

    fn retain_servers_within_latency_window(&self, suitable_servers: &mut Vec<&ServerDescription>) {
        let shortest_rtt = suitable_servers
            .iter()
            .filter_map(|server_desc| server_desc.round_trip_time)
            .min();

        let max_rtt_within_window = match shortest_rtt {
            Some(rtt) => rtt.checked_add(self.local_threshold).unwrap_or(Duration::MAX),
            // Nothing has been measured, so every suitable server is in the window.
            None => return,
        };

        suitable_servers.retain(move |server_desc| match server_desc.round_trip_time {
            Some(server_rtt) => server_rtt <= max_rtt_within_window,
            None => false,
        });
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.selectable_servers()
            .filter(move |server| types.contains(&server.server_type))
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Vec<&ServerDescription> {
        let tag_sets = read_preference.tag_sets();

        match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => {
                self.suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets)
            }
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self.suitable_servers_for_read_preference(
                        &[ServerType::RsSecondary],
                        tag_sets,
                    ),
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self
                    .suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets);

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
            ),
        }
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
    ) -> Vec<&ServerDescription> {
        let mut servers = self.servers_with_type(types).collect();

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        servers
    }
}

/// Keeps the servers matching the first tag set that matches any server. An empty tag set
/// matches every server.
fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}
