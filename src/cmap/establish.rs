use std::fmt::Debug;

use futures_util::future::BoxFuture;

use super::conn::Connection;
use crate::{error::Result, options::ServerAddress};

/// Opens new connections to a server on behalf of its connection pool.
///
/// Everything below the command level (sockets, TLS, handshake, authentication) belongs to the
/// implementation. The returned connection's description must reflect the handshake reply and
/// carry the given connection id.
pub trait ConnectionEstablisher: Send + Sync + Debug {
    /// Establishes a connection to `address`.
    fn establish<'a>(
        &'a self,
        address: &'a ServerAddress,
        connection_id: u32,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>>;
}
