//! Daemon lifecycle.
//!
//! Orchestrates the server components:
//! - Store (creates the encryption key on first start)
//! - Signal handler (SIGTERM/SIGINT for shutdown)
//! - Refresh scheduler
//! - HTTP listener with graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::context::{AppContext, SharedContext};
use crate::error::ServerResult;
use crate::http::router;
use crate::signals::Shutdown;

/// How long shutdown waits for a tick in progress.
const SCHEDULER_GRACE: Duration = Duration::from_secs(60);

/// Runs the daemon until SIGTERM or SIGINT.
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let bind = config.bind;
    let ctx = Arc::new(AppContext::open(config)?);

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let listener = TcpListener::bind(bind).await?;
    info!(address = %bind, base_url = %ctx.credentials.base_url()?, "Server listening");

    serve(ctx, listener, shutdown).await?;
    info!("Server stopped");
    Ok(())
}

/// Serves `listener` and runs the scheduler until `shutdown` fires.
async fn serve(
    ctx: SharedContext,
    listener: TcpListener,
    shutdown: Shutdown,
) -> ServerResult<()> {
    let scheduler_task = tokio::spawn(ctx.scheduler().run(shutdown.signal()));

    let serve_result = axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown.signal().wait())
        .await;

    info!("Shutting down...");
    // The scheduler stops on this signal too, including when the server
    // failed before any signal arrived.
    shutdown.trigger();
    match tokio::time::timeout(SCHEDULER_GRACE, scheduler_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Scheduler task failed"),
        Err(_) => warn!("Scheduler did not stop in time"),
    }

    Ok(serve_result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::testing::{FakeConnector, FakeIdentityBuilder, FakeSource};

    #[tokio::test]
    async fn shutdown_stops_server_and_scheduler() {
        let ctx = Arc::new(AppContext::with_parts(
            ServerConfig::new(":memory:"),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(FakeIdentityBuilder::default()),
            Arc::new(FakeConnector::new(Arc::new(FakeSource::default()))),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = Shutdown::new();

        let task = tokio::spawn(serve(ctx, listener, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
