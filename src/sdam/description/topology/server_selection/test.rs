use std::{collections::HashMap, sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;

use super::attempt_to_select_server;
use crate::{
    options::{ClusterOptions, ServerAddress},
    sdam::{
        description::{
            server::{ServerDescription, ServerType},
            topology::ClusterDescription,
        },
        Server,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
    test::MockEstablisher,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestCase {
    description: String,
    servers: Vec<TestServerDescription>,
    read_preference: ReadPreference,
    in_latency_window: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestServerDescription {
    address: String,
    #[serde(rename = "type")]
    server_type: ServerType,
    avg_rtt_ms: Option<u64>,
    #[serde(default)]
    tags: TagSet,
    #[serde(default = "default_ok")]
    ok: bool,
}

fn default_ok() -> bool {
    true
}

impl TestServerDescription {
    fn into_server_description(self) -> ServerDescription {
        ServerDescription::builder()
            .address(ServerAddress::parse(&self.address).unwrap())
            .server_type(self.server_type)
            .ok(self.ok)
            .round_trip_time(self.avg_rtt_ms.map(Duration::from_millis))
            .tags(self.tags)
            .max_wire_version(17)
            .build()
    }
}

fn cluster_description(servers: Vec<ServerDescription>) -> ClusterDescription {
    let options = ClusterOptions::builder()
        .hosts(Vec::<ServerAddress>::new())
        .build();
    let mut description = ClusterDescription::new(&options);
    for server in servers {
        description.update(server);
    }
    description
}

fn run_test_case(test_case: TestCase) {
    let description = cluster_description(
        test_case
            .servers
            .into_iter()
            .map(TestServerDescription::into_server_description)
            .collect(),
    );
    let criteria = SelectionCriteria::ReadPreference(test_case.read_preference);

    let mut in_window: Vec<String> = description
        .suitable_servers_in_latency_window(&criteria)
        .into_iter()
        .map(|server| server.address.to_string())
        .collect();
    in_window.sort();

    let mut expected = test_case.in_latency_window;
    expected.sort();

    assert_eq!(in_window, expected, "{}", test_case.description);
}

#[test]
fn suitable_servers_in_latency_window() {
    let test_cases = json!([
        {
            "description": "primary read goes to the primary",
            "servers": [
                { "address": "a:27017", "type": "RSPrimary", "avgRttMs": 50 },
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 5 },
            ],
            "readPreference": { "mode": "primary" },
            "inLatencyWindow": ["a:27017"],
        },
        {
            "description": "secondary read keeps only secondaries within the window",
            "servers": [
                { "address": "a:27017", "type": "RSPrimary", "avgRttMs": 1 },
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 5 },
                { "address": "c:27017", "type": "RSSecondary", "avgRttMs": 15 },
                { "address": "d:27017", "type": "RSSecondary", "avgRttMs": 30 },
            ],
            "readPreference": { "mode": "secondary" },
            "inLatencyWindow": ["b:27017", "c:27017"],
        },
        {
            "description": "secondaryPreferred falls back to the primary",
            "servers": [
                { "address": "a:27017", "type": "RSPrimary", "avgRttMs": 1 },
                { "address": "b:27017", "type": "RSArbiter", "avgRttMs": 1 },
            ],
            "readPreference": { "mode": "secondaryPreferred" },
            "inLatencyWindow": ["a:27017"],
        },
        {
            "description": "primaryPreferred falls back to secondaries",
            "servers": [
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 1 },
                { "address": "c:27017", "type": "RSSecondary", "avgRttMs": 2 },
            ],
            "readPreference": { "mode": "primaryPreferred" },
            "inLatencyWindow": ["b:27017", "c:27017"],
        },
        {
            "description": "nearest filters by the first matching tag set",
            "servers": [
                { "address": "a:27017", "type": "RSPrimary", "avgRttMs": 1, "tags": { "dc": "ny" } },
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 1, "tags": { "dc": "sf" } },
                { "address": "c:27017", "type": "RSSecondary", "avgRttMs": 1, "tags": { "dc": "ny" } },
            ],
            "readPreference": {
                "mode": "nearest",
                "tagSets": [{ "dc": "la" }, { "dc": "ny" }],
            },
            "inLatencyWindow": ["a:27017", "c:27017"],
        },
        {
            "description": "no tag set matching selects nothing",
            "servers": [
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 1, "tags": { "dc": "sf" } },
            ],
            "readPreference": { "mode": "secondary", "tagSets": [{ "dc": "ny" }] },
            "inLatencyWindow": [],
        },
        {
            "description": "servers that are not ok are never suitable",
            "servers": [
                { "address": "a:27017", "type": "RSPrimary", "avgRttMs": 1, "ok": false },
                { "address": "b:27017", "type": "RSSecondary", "avgRttMs": 1 },
            ],
            "readPreference": { "mode": "primary" },
            "inLatencyWindow": [],
        },
        {
            "description": "sharded clusters route to mongoses",
            "servers": [
                { "address": "a:27017", "type": "Mongos", "avgRttMs": 1 },
                { "address": "b:27017", "type": "Mongos", "avgRttMs": 100 },
            ],
            "readPreference": { "mode": "secondary" },
            "inLatencyWindow": ["a:27017"],
        },
        {
            "description": "single clusters route to the standalone regardless of mode",
            "servers": [
                { "address": "a:27017", "type": "Standalone", "avgRttMs": 1 },
            ],
            "readPreference": { "mode": "nearest" },
            "inLatencyWindow": ["a:27017"],
        },
        {
            "description": "nothing is suitable in an unknown cluster",
            "servers": [
                { "address": "a:27017", "type": "Unknown" },
            ],
            "readPreference": { "mode": "nearest" },
            "inLatencyWindow": [],
        },
    ]);

    let test_cases: Vec<TestCase> = serde_json::from_value(test_cases).unwrap();
    for test_case in test_cases {
        run_test_case(test_case);
    }
}

fn servers_for(description: &ClusterDescription) -> HashMap<ServerAddress, Arc<Server>> {
    let options = ClusterOptions::default();
    let establisher = Arc::new(MockEstablisher::new());
    description
        .server_addresses()
        .map(|address| {
            (
                address.clone(),
                Server::new(address.clone(), &options, establisher.clone()),
            )
        })
        .collect()
}

fn mongos(address: &str) -> ServerDescription {
    ServerDescription::builder()
        .address(ServerAddress::parse(address).unwrap())
        .server_type(ServerType::Mongos)
        .round_trip_time(Duration::from_millis(1))
        .build()
}

#[test]
fn selection_prefers_fewest_in_flight_operations() {
    let description = cluster_description(vec![mongos("a:27017"), mongos("b:27017")]);
    let servers = servers_for(&description);
    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);

    let a = ServerAddress::parse("a:27017").unwrap();
    let b = ServerAddress::parse("b:27017").unwrap();

    // Equal load: ties are broken by address.
    let first = attempt_to_select_server(&criteria, &description, &servers).unwrap();
    assert_eq!(first.address, a);
    assert_eq!(servers[&a].operation_count(), 1);

    // `a` now has an operation in flight.
    let second = attempt_to_select_server(&criteria, &description, &servers).unwrap();
    assert_eq!(second.address, b);

    drop(first);
    drop(second);
    assert_eq!(servers[&a].operation_count(), 0);
    assert_eq!(servers[&b].operation_count(), 0);
}

#[test]
fn selection_is_deterministic_for_a_snapshot() {
    let description = cluster_description(vec![
        mongos("c:27017"),
        mongos("a:27017"),
        mongos("b:27017"),
    ]);
    let servers = servers_for(&description);
    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);

    for _ in 0..10 {
        let selected = attempt_to_select_server(&criteria, &description, &servers).unwrap();
        assert_eq!(selected.address.host, "a");
    }
}

#[test]
fn cloned_selection_holds_its_own_lease() {
    let description = cluster_description(vec![mongos("a:27017")]);
    let servers = servers_for(&description);
    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
    let a = ServerAddress::parse("a:27017").unwrap();

    let selected = attempt_to_select_server(&criteria, &description, &servers).unwrap();
    let cloned = selected.clone();
    assert_eq!(servers[&a].operation_count(), 2);

    drop(selected);
    assert_eq!(servers[&a].operation_count(), 1);
    drop(cloned);
    assert_eq!(servers[&a].operation_count(), 0);
}

#[test]
fn predicate_criteria_filter_selectable_servers() {
    let description = cluster_description(vec![mongos("a:27017"), mongos("b:27017")]);
    let servers = servers_for(&description);
    let criteria = SelectionCriteria::from_address(ServerAddress::parse("b:27017").unwrap());

    let selected = attempt_to_select_server(&criteria, &description, &servers).unwrap();
    assert_eq!(selected.address.host, "b");
}

#[test]
fn timeout_message_distinguishes_no_available_servers() {
    let description = cluster_description(vec![ServerDescription::new(
        ServerAddress::parse("a:27017").unwrap(),
    )]);
    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
    assert!(description
        .server_selection_timeout_error_message(&criteria)
        .contains("No available servers"));

    let description = cluster_description(vec![mongos("a:27017")]);
    let criteria = SelectionCriteria::Predicate(Arc::new(|_: &ServerDescription| false));
    assert!(description
        .server_selection_timeout_error_message(&criteria)
        .contains("None of the available servers suitable"));
}
