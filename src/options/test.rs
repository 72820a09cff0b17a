use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::options::{ClusterOptions, ServerAddress};

#[test]
fn parse_address() {
    let address = ServerAddress::parse("Example.com:27018").unwrap();
    assert_eq!(address.host, "example.com");
    assert_eq!(address.port, Some(27018));
    assert_eq!(address.to_string(), "example.com:27018");

    let address = ServerAddress::parse("localhost").unwrap();
    assert_eq!(address.port, None);
    assert_eq!(address.to_string(), "localhost:27017");
    assert_eq!(address, ServerAddress::new("localhost", 27017));
}

#[test]
fn parse_invalid_address() {
    assert!(ServerAddress::parse("").is_err());
    assert!(ServerAddress::parse("a:b").is_err());
    assert!(ServerAddress::parse("a:0").is_err());
    assert!(ServerAddress::parse("a:1:2").is_err());
}

#[test]
fn addresses_order_by_host_then_port() {
    let mut addresses = vec![
        ServerAddress::new("b", 1),
        ServerAddress::new("a", 27018),
        ServerAddress::new("a", None),
    ];
    addresses.sort();
    assert_eq!(
        addresses,
        vec![
            ServerAddress::new("a", None),
            ServerAddress::new("a", 27018),
            ServerAddress::new("b", 1),
        ]
    );
}

#[test]
fn default_options() {
    let options = ClusterOptions::default();
    assert_eq!(options.hosts, vec![ServerAddress::default()]);
    assert_eq!(options.server_selection_timeout(), Duration::from_secs(30));
    assert_eq!(options.local_threshold(), Duration::from_millis(15));
    assert_eq!(options.max_pool_size(), 10);
    assert!(options.retry_writes());
    assert!(options.validate().is_ok());
}

#[test]
fn deserialize_options() {
    let options: ClusterOptions = serde_json::from_value(serde_json::json!({
        "hosts": ["a:1", "b"],
        "serverSelectionTimeoutMS": 500,
        "localThresholdMS": 5,
        "maxPoolSize": 2,
        "waitQueueTimeoutMS": 100,
        "retryWrites": false,
    }))
    .unwrap();

    assert_eq!(
        options,
        ClusterOptions::builder()
            .hosts(vec![ServerAddress::new("a", 1), ServerAddress::new("b", None)])
            .server_selection_timeout(Duration::from_millis(500))
            .local_threshold(Duration::from_millis(5))
            .max_pool_size(2)
            .wait_queue_timeout(Duration::from_millis(100))
            .retry_writes(false)
            .build()
    );
    assert!(!options.retry_writes());

    let options: ClusterOptions = serde_json::from_value(serde_json::json!({})).unwrap();
    assert_eq!(options, ClusterOptions::default());
}

#[test]
fn invalid_options() {
    let options = ClusterOptions::builder().hosts(Vec::new()).build();
    assert!(options.validate().is_err());

    let options = ClusterOptions::builder().max_pool_size(0).build();
    assert!(options.validate().is_err());
}
