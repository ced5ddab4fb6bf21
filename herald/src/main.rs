//! The herald daemon binary: load config, wire the pipeline, run until
//! interrupted.

mod config;

use std::sync::Arc;

use herald_common::{Signal, logging};
use herald_dispatch::{
    Daemon, DaemonSpawner, LogTransport, Mailer, MemoryNewsletterSource, MemoryRecipientSource,
    QueueProcessor, QueueSelector, RateLimitLog, Supervisor, TaskScheduler, Transport,
    trigger_loop,
};
use herald_store::DaemonHandle;
use tokio::sync::broadcast;

use crate::config::Config;

/// Runs the daemon loop as a tokio task when the supervisor asks for one.
struct TokioSpawner {
    daemon: Daemon,
    shutdown: broadcast::Sender<Signal>,
}

impl DaemonSpawner for TokioSpawner {
    fn spawn(&self, handle: DaemonHandle) {
        let daemon = self.daemon.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = daemon.serve(handle.token, shutdown).await {
                tracing::error!(error = %e, "Daemon exited with error");
            }
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./herald.toml".to_string());
    let config = Config::from_file(&path)?;

    logging::init();
    tracing::info!(config = %path, "herald starting");

    let (queues, state) = config.store.into_stores()?;

    let limiter = RateLimitLog::new(
        state.clone(),
        config.dispatch.limiter,
        config.dispatch.backoff,
    );

    // Until a provider adapter is wired in, outbound mail goes to the log.
    let transport: Arc<dyn Transport> = Arc::new(LogTransport::default());

    let processor = QueueProcessor::new(
        queues.clone(),
        Arc::new(MemoryNewsletterSource::new()),
        Arc::new(MemoryRecipientSource::new()),
        Mailer::new(transport, limiter.clone()),
        config.dispatch.processor,
    );

    let daemon = Daemon::new(
        state.clone(),
        QueueSelector::new(queues.clone()),
        processor,
        limiter.clone(),
        config.dispatch.daemon,
    );

    let (shutdown, _) = broadcast::channel(8);
    let spawner = Arc::new(TokioSpawner {
        daemon,
        shutdown: shutdown.clone(),
    });

    let supervisor = Supervisor::new(state, spawner, config.dispatch.supervisor);
    let scheduler = Arc::new(TaskScheduler::new(
        &config.dispatch.scheduler,
        supervisor,
        QueueSelector::new(queues),
        limiter.clone(),
    )?);

    tracing::info!(method = ?scheduler.method(), "Task scheduler configured");

    let trigger = tokio::spawn(trigger_loop(
        scheduler,
        config.dispatch.scheduler.trigger_interval_secs,
        shutdown.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    shutdown.send(Signal::Shutdown).ok();
    trigger.await?;

    if let Ok(stats) = limiter.stats().await {
        tracing::info!(
            sent = stats.sent,
            cap = stats.cap,
            retry_attempt = stats.retry_attempt,
            "Final sending window"
        );
    }

    Ok(())
}
