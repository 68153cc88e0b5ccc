use anyhow::Context;
use sppmon::notify::{LogSink, NotificationSink, Notifier, TelegramSink};
use sppmon::{api, config::Config, db::init_db, Monitor, Repository, Scheduler, WildberriesSource};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, once).await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let source = Arc::new(WildberriesSource::from_config(&config));
    let sink: Arc<dyn NotificationSink> = match &config.telegram_bot_token {
        Some(token) => Arc::new(TelegramSink::new(reqwest::Client::new(), token.clone())),
        None => {
            warn!("TELEGRAM_BOT_TOKEN not set, notifications will only be logged");
            Arc::new(LogSink)
        }
    };
    let notifier = Notifier::from_config(sink, &config);
    let monitor = Arc::new(Monitor::new(
        source.clone(),
        source,
        repo.clone(),
        notifier,
        &config.settings,
        config.max_concurrent_entities,
    ));

    if config.entities.is_empty() {
        warn!("No articles or categories configured");
    }
    for warning in config.startup_warnings() {
        warn!("{}", warning);
    }

    if once {
        let report = monitor.run_pass(&config.entities).await;
        info!(
            changed = report.changed(),
            failed = report.failed(),
            "Single pass finished"
        );
        return Ok(());
    }

    let config = Arc::new(config);
    let app = api::create_router(api::AppState::new(repo, config.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!("Server listening on {}", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status API stopped");
        }
    });

    let scheduler = Scheduler::new(
        monitor,
        config.entities.clone(),
        Duration::from_secs(config.cycle_interval_secs),
    );
    scheduler.run_until(shutdown_signal()).await;

    server.abort();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
