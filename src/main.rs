use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use support_desk::api::{AppState, ticket_routes};
use support_desk::config::{AppConfig, SERVICE_NAME};
use support_desk::errlog::ErrorReporter;
use support_desk::llm::create_provider;
use support_desk::notify::{LogNotifier, NotificationDispatcher, Notifier, SmtpNotifier};
use support_desk::pipeline::{AnalyticsGenerator, BatchConsumer, TicketStateUpdater};
use support_desk::store::{LibSqlBackend, TicketQueue};
use support_desk::worker::{QueueWorker, spawn_queue_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Held for the life of the process so buffered log lines are flushed.
    let _log_guard = init_tracing(&config);

    eprintln!("🎫 Support Desk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Intake API: http://0.0.0.0:{}/api/tickets", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    let recovered = db.recover_in_flight().await?;
    if recovered > 0 {
        eprintln!("   Recovered {recovered} in-flight queue messages");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let reporter = Arc::new(ErrorReporter::new(
        Some(db.clone()),
        SERVICE_NAME,
        config.environment.clone(),
        llm.model_name(),
    ));

    let notifier: Arc<dyn Notifier> = match config.smtp.clone() {
        Some(smtp) => {
            eprintln!("   Notifications: SMTP via {}", smtp.host);
            Arc::new(SmtpNotifier::new(smtp)?)
        }
        None => {
            eprintln!("   Notifications: log only (SUPPORT_SMTP_HOST not set)");
            Arc::new(LogNotifier)
        }
    };

    let consumer = Arc::new(BatchConsumer::new(
        AnalyticsGenerator::new(llm, reporter.clone(), config.analytics.clone()),
        TicketStateUpdater::new(db.clone()),
        NotificationDispatcher::new(notifier),
        reporter,
    ));
    let worker = Arc::new(QueueWorker::new(
        db.clone(),
        consumer,
        Arc::new(TicketStateUpdater::new(db.clone())),
        config.worker.clone(),
    ));
    let (worker_handle, worker_shutdown) = spawn_queue_worker(worker);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = ticket_routes(AppState {
        store: db.clone(),
        intake: db.clone(),
        service: SERVICE_NAME.to_string(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Ticket API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    worker_shutdown.store(true, Ordering::Relaxed);
    worker_handle.await.ok();
    Ok(())
}

/// Console logging, plus a daily rolling file when a log directory is set.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "support-desk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
