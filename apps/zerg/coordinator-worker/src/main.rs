//! Coordinator Worker - Entry Point
//!
//! Runs the job queues, cache, and session store until SIGINT/SIGTERM.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    zerg_coordinator_worker::run().await
}
