//! `castqueue worker` command: runs the claim/execute/classify/persist loop
//! in-process until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use castqueue_core::episode::EpisodeRepository;
use castqueue_core::progress::ProgressBus;
use castqueue_core::worker::{self, WorkerConfig};

use crate::episodes::TaskHistoryEpisodeRepository;
use crate::handlers::passthrough_registry;

pub async fn run_worker(pool: PgPool, config: WorkerConfig) -> Result<()> {
    let registry = Arc::new(passthrough_registry());
    let episodes: Arc<dyn EpisodeRepository> =
        Arc::new(TaskHistoryEpisodeRepository::new(pool.clone()));
    let progress = Arc::new(ProgressBus::new());

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down worker gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    tracing::info!("castqueue worker starting");
    worker::run_worker(pool, registry, episodes, progress, config, cancel).await?;
    tracing::info!("castqueue worker stopped");

    Ok(())
}
