use std::future::Future;

use tracing::{Instrument, error, trace};

/// Spawn a task under a named span, logging entry/exit the way the rest of
/// the connection/manager tasks expect to be observable in `RUST_LOG=trace`.
pub fn spawn<Fut>(name: &'static str, fut: Fut) -> tokio::task::JoinHandle<()>
where
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let span = tracing::info_span!("task", name);
    tokio::spawn(
        async move {
            trace!("starting");
            match fut.await {
                Ok(()) => trace!("finished"),
                Err(e) => error!(error = ?e, "task failed"),
            }
        }
        .instrument(span),
    )
}
