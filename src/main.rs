use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::{connect_to_db, run_migrations};
use crate::infrastructure::queue::connect_consumers;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::acquisition::downloader::Downloader;
use crate::modules::acquisition::lock::PgAdvisoryLocks;
use crate::modules::acquisition::publisher::{ObjectStore, Publisher};
use crate::modules::acquisition::repository::PgLedger;
use crate::modules::acquisition::service::AcquisitionService;
use crate::modules::acquisition::transformer::{FfmpegTool, Transformer};
use crate::state::AppState;
use crate::workers::acquisition::run_consumer;

mod app;
mod common;
mod config;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting acquisition worker...");

    let config = AppConfig::new()?;

    let db = connect_to_db(&config.database_url, config.db_max_connections()).await?;
    run_migrations(&db).await?;

    let ffmpeg = which::which(&config.ffmpeg_path)
        .with_context(|| format!("media tool '{}' not found", config.ffmpeg_path))?;
    info!(path = %ffmpeg.display(), "🎬 Media tool located");

    let store = config
        .storage
        .as_ref()
        .map(|storage| Arc::new(StorageService::new(storage)) as Arc<dyn ObjectStore>);

    let service = Arc::new(AcquisitionService::new(
        Arc::new(PgLedger::new(db.clone())),
        Arc::new(PgAdvisoryLocks::new(db.clone())),
        Downloader::new(config.download_timeout)?,
        Transformer::new(Arc::new(FfmpegTool::new(ffmpeg.to_string_lossy()))),
        Publisher::new(store),
        Arc::new(Semaphore::new(config.transcode_permits)),
        config.scratch_dir.clone(),
    ));

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();

    let queues = connect_consumers(&config).await?;
    let mut consumers = JoinSet::new();
    for (i, queue) in queues.into_iter().enumerate() {
        consumers.spawn(run_consumer(
            i,
            queue,
            service.clone(),
            config.poll_timeout,
            shutdown.clone(),
            abort.clone(),
        ));
    }
    info!(
        workers = config.worker_concurrency,
        transcode_permits = config.transcode_permits,
        backend = config.queue.backend().as_str(),
        queue = %config.queue_name,
        "🚀 Consumers running"
    );

    let app = app::create_app(AppState::new(config.clone(), db.clone()));
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Probe server running on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    wait_for_signal().await;
    info!("🛑 Shutdown requested, draining in-flight jobs");
    shutdown.cancel();

    let drained = tokio::select! {
        _ = join_consumers(&mut consumers) => true,
        _ = tokio::time::sleep(config.shutdown_grace) => false,
        _ = wait_for_signal() => false,
    };
    if !drained {
        warn!("Grace period over, aborting in-flight jobs");
        abort.cancel();
        join_consumers(&mut consumers).await;
    }

    match server.await {
        Ok(Err(e)) => error!("Probe server error: {}", e),
        Err(e) => error!("Probe server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    db.close().await;
    info!("👋 Acquisition worker stopped");
    Ok(())
}

async fn join_consumers(consumers: &mut JoinSet<()>) {
    while let Some(joined) = consumers.join_next().await {
        if let Err(e) = joined {
            error!("Consumer task failed: {}", e);
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
