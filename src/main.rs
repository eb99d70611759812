use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use mail_triage::config::AppConfig;
use mail_triage::error::Result;
use mail_triage::mailbox::ImapConnector;
use mail_triage::pipeline::Ingestor;
use mail_triage::scheduler::spawn_ingest_scheduler;
use mail_triage::store::{Database, LibSqlBackend};
use tracing_appender::non_blocking::WorkerGuard;

/// Records reclassified at startup, per run.
const RECOVERY_BATCH: usize = 500;

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.database_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.database_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Ingestion ────────────────────────────────────────────────────────
    let scheduler = match config.mailbox.clone() {
        Some(mailbox) => {
            eprintln!(
                "   Mailbox: {} on {}:{} ({}), every {}s",
                mailbox.username,
                mailbox.host,
                mailbox.port,
                mailbox.folder,
                config.poll_interval.as_secs()
            );

            let connector = Arc::new(ImapConnector::new(mailbox));
            let ingestor = Arc::new(
                Ingestor::new(connector, Arc::clone(&db))
                    .with_max_body_chars(config.max_body_chars),
            );

            // Records a crash left in NEW get classified before polling resumes.
            if let Err(e) = ingestor.reclassify_pending(RECOVERY_BATCH).await {
                tracing::error!(error = %e, "Startup reclassification failed");
            }

            Some(spawn_ingest_scheduler(ingestor, config.poll_interval))
        }
        None => {
            eprintln!("   Mailbox: disabled (IMAP_EMAIL not set)");
            tracing::warn!("IMAP credentials not configured, email polling disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    if let Some((handle, shutdown)) = scheduler {
        shutdown.store(true, Ordering::Relaxed);
        handle.abort();
    }

    Ok(())
}

/// Stderr logging, plus a daily-rotated file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    if let Some(dir) = log_dir
        && std::fs::create_dir_all(dir).is_ok()
    {
        let file_appender = tracing_appender::rolling::daily(dir, "mail-triage.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
        return Some(guard);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
    None
}
