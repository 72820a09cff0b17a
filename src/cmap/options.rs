use std::time::Duration;

use crate::options::ClusterOptions;

/// Contains the options for creating a connection pool.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ConnectionPoolOptions {
    /// The maximum number of connections that the pool can have at a given time. This includes
    /// connections which are currently checked out of the pool.
    pub(crate) max_pool_size: u32,

    /// The amount of time a thread should block while waiting to check out a connection before
    /// returning an error. If unset, checkouts wait indefinitely.
    pub(crate) wait_queue_timeout: Option<Duration>,
}

impl ConnectionPoolOptions {
    pub(crate) fn from_cluster_options(options: &ClusterOptions) -> Self {
        Self {
            max_pool_size: options.max_pool_size(),
            wait_queue_timeout: options.wait_queue_timeout,
        }
    }
}
