use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use formsync_core::{
    config_path, load_config, resolve_start_cursor, storage, validate_config, AggregateServer, EventSink,
    FormKey, InstanceIndex, JobsRunner, ProgressEvent, ProgressKind, PullFromAggregate,
    PullOptions, ReqwestHttp, SanitizedConfig, SqliteInstanceIndex,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path();

    info!("formsync {} loading configuration from {:?}", VERSION, config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        server = %config.server.url,
        forms = config.pull.forms.len(),
        config_hash = &config_hash[..16],
        "Configuration loaded"
    );

    let http = Arc::new(ReqwestHttp::new(&config.server).context("Failed to create HTTP client")?);
    let index: Arc<dyn InstanceIndex> = Arc::new(
        SqliteInstanceIndex::new(&config.storage.index_path)
            .with_context(|| format!("Failed to open index {:?}", config.storage.index_path))?,
    );
    info!("Instance index opened at {:?}", config.storage.index_path);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let event_logger = tokio::spawn(log_events(events_rx));

    let puller = PullFromAggregate::new(
        http,
        AggregateServer::new(&config.server.url),
        index,
        &config.storage.root,
        PullOptions::from(&config.pull),
        EventSink::channel(events_tx),
    );

    let mut jobs = Vec::with_capacity(config.pull.forms.len());
    for form_id in &config.pull.forms {
        let form = FormKey::new(form_id);
        let cursor_file = puller.layout(&form).cursor_file();
        let stored = match storage::load_cursor(&cursor_file).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(form_id = %form_id, error = %e, "Ignoring unreadable saved cursor");
                None
            }
        };
        let start = resolve_start_cursor(&config.pull, stored);
        info!(form_id = %form_id, cursor = %start, "Queueing pull");
        jobs.push(puller.pull(form, start));
    }

    let handle = JobsRunner::new(config.runner.max_workers).launch_async(jobs, |e| {
        error!("Pull job failed: {}", e);
    });

    let canceller = handle.canceller();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        canceller.cancel();
    });

    let results = handle.wait_for_completion().await;
    signal_task.abort();

    let mut failed = 0;
    for result in results {
        let result = match result {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => continue,
            Err(_) => {
                failed += 1;
                continue;
            }
        };
        let cursor_file = puller.layout(&result.form).cursor_file();
        storage::save_cursor(&cursor_file, &result.last_cursor)
            .await
            .with_context(|| format!("Failed to save cursor of {}", result.form.id))?;
        info!(
            form_id = %result.form.id,
            downloaded = result.summary.submissions_downloaded,
            skipped = result.summary.submissions_skipped,
            errors = result.summary.errors,
            cancelled = result.summary.cancelled,
            "Form pulled"
        );
    }

    // Closes the event channel so the logger drains and exits.
    drop(puller);
    let _ = event_logger.await;

    if failed > 0 {
        bail!("{} of {} form pulls failed", failed, config.pull.forms.len());
    }
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = events.recv().await {
        match event.kind {
            ProgressKind::Failure => warn!(form_id = %event.form_id, "{}", event.message),
            _ => info!(form_id = %event.form_id, "{}", event.message),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
