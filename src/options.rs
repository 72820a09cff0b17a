//! Contains the options for configuring a [`Cluster`](crate::sdam::Cluster) and the address type
//! used to identify servers.

#[cfg(test)]
mod test;

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use serde::{de::Error as SerdeError, Deserialize, Deserializer};
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    serde_util,
};

pub use crate::{
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
    session::TransactionOptions,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

/// The default amount of time to wait for a suitable server before failing server selection.
pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// The default width of the latency window used to pick among suitable servers.
pub(crate) const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// The default maximum number of connections a single server's pool will open.
pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 10;

/// A hostname:port address pair.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub struct ServerAddress {
    /// The hostname of the address.
    pub host: String,

    /// The port of the address.
    ///
    /// The default is 27017.
    pub port: Option<u16>,
}

impl ServerAddress {
    /// Creates a new address from a host and an optional port.
    pub fn new(host: impl Into<String>, port: impl Into<Option<u16>>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Parses an address string into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let invalid = || Error::invalid_argument(format!("invalid server address: {address:?}"));

        let mut parts = address.split(':');
        let host = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => return Err(invalid()),
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| invalid())?;
                if port == 0 || parts.next().is_some() {
                    return Err(invalid());
                }
                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress {
            host: host.to_lowercase(),
            port,
        })
    }

    /// The port of this address, falling back to the default port when none was given.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| D::Error::custom(format!("{e}")))
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port_or_default() == other.port_or_default()
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.host.hash(state);
        self.port_or_default().hash(state);
    }
}

impl Ord for ServerAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.port_or_default().cmp(&other.port_or_default()))
    }
}

impl PartialOrd for ServerAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for ServerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port_or_default())
    }
}

/// Contains the options that can be used to create a new
/// [`Cluster`](crate::sdam::Cluster).
#[derive(Clone, Debug, Deserialize, TypedBuilder, PartialEq)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ClusterOptions {
    /// The initial list of seeds that the cluster tracks. Each seed starts out in the `Unknown`
    /// state until a description for it is published.
    ///
    /// The default value is a single seed of `localhost:27017`.
    #[builder(default_code = "vec![ServerAddress::default()]")]
    #[serde(default = "default_hosts")]
    pub hosts: Vec<ServerAddress>,

    /// The amount of time to wait for a suitable server to become available before failing
    /// server selection.
    ///
    /// The default value is 30 seconds.
    #[serde(
        rename = "serverSelectionTimeoutMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub server_selection_timeout: Option<Duration>,

    /// The amount of latency beyond that of the fastest suitable server that is tolerated when
    /// choosing among suitable servers.
    ///
    /// The default value is 15 milliseconds.
    #[serde(
        rename = "localThresholdMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub local_threshold: Option<Duration>,

    /// The maximum number of connections that each server's pool may have open at once.
    ///
    /// The default value is 10.
    #[serde(rename = "maxPoolSize")]
    pub max_pool_size: Option<u32>,

    /// The amount of time a checkout waits for a connection to become available before failing.
    ///
    /// By default, checkouts wait indefinitely.
    #[serde(
        rename = "waitQueueTimeoutMS",
        default,
        deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis"
    )]
    pub wait_queue_timeout: Option<Duration>,

    /// Whether supported write operations are retried once after a retryable failure.
    ///
    /// The default value is true.
    pub retry_writes: Option<bool>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_hosts() -> Vec<ServerAddress> {
    vec![ServerAddress::default()]
}

impl ClusterOptions {
    pub(crate) fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT)
    }

    pub(crate) fn local_threshold(&self) -> Duration {
        self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD)
    }

    pub(crate) fn max_pool_size(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub(crate) fn retry_writes(&self) -> bool {
        self.retry_writes.unwrap_or(true)
    }

    /// Checks that the options are internally consistent.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::invalid_argument("at least one host must be specified"));
        }
        if self.max_pool_size == Some(0) {
            return Err(Error::invalid_argument("max_pool_size must be positive"));
        }
        Ok(())
    }
}
