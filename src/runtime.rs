mod join_handle;

use std::{future::Future, time::Duration};

pub(crate) use self::join_handle::AsyncJoinHandle;
use crate::error::Result;

/// Spawn a task in the background to run a future.
///
/// Outside of a runtime this falls back to the runtime backing the blocking API when the `sync`
/// feature is enabled; otherwise it must be called from an async block or function running on a
/// tokio runtime.
pub(crate) fn spawn<F, O>(fut: F) -> AsyncJoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    #[cfg(feature = "sync")]
    {
        if tokio::runtime::Handle::try_current().is_err() {
            return AsyncJoinHandle::new(crate::sync::TOKIO_RUNTIME.spawn(fut));
        }
    }

    AsyncJoinHandle::spawn(fut)
}

/// Await on a future for a maximum amount of time before returning an error.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| std::io::ErrorKind::TimedOut.into())
}

/// Run a future to completion on the runtime backing the blocking API. Must not be called from
/// within an async context.
#[cfg(feature = "sync")]
pub(crate) fn block_on<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    crate::sync::TOKIO_RUNTIME.block_on(fut)
}
