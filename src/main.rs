use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cvilo_intake::channels::{Channel, ChannelManager, CliChannel, TelegramChannel};
use cvilo_intake::config::AppConfig;
use cvilo_intake::delivery::DeliveryLoop;
use cvilo_intake::intake::{ConversationDriver, IntakeRouteState, intake_routes};
use cvilo_intake::store::{LibSqlBackend, MemoryStore, ProfileStore, ResumeSink};
use cvilo_intake::sweeper;

/// Console logging, plus a daily rolling file when a log dir is set.
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cvilo-intake.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

/// Open the configured store; one object serves drafts and resumes.
async fn open_store(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn ProfileStore>, Arc<dyn ResumeSink>)> {
    if config.uses_memory_store() {
        eprintln!("   Store: in-memory (nothing survives a restart)");
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn ProfileStore> = memory.clone();
        let resumes: Arc<dyn ResumeSink> = memory;
        return Ok((store, resumes));
    }

    eprintln!("   Store: {}", config.db_path);
    let db = Arc::new(LibSqlBackend::new_local(Path::new(&config.db_path)).await?);
    let store: Arc<dyn ProfileStore> = db.clone();
    let resumes: Arc<dyn ResumeSink> = db;
    Ok((store, resumes))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("Cvilo intake v{}", env!("CARGO_PKG_VERSION"));

    // ── Store ───────────────────────────────────────────────────────────
    let (store, resumes) = open_store(&config).await?;

    // ── Sweeper ─────────────────────────────────────────────────────────
    let sweeper_handle = config.sweeper.map(|sweep| {
        eprintln!(
            "   Sweeper: drafts idle for {}h expire (every {}s)",
            sweep.idle_after.as_secs() / 3600,
            sweep.interval.as_secs()
        );
        sweeper::spawn_sweeper(Arc::clone(&store), sweep)
    });

    // ── REST ────────────────────────────────────────────────────────────
    let app = intake_routes(IntakeRouteState {
        store: Arc::clone(&store),
        resumes: Arc::clone(&resumes),
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    eprintln!("   REST: http://0.0.0.0:{}/api/intake/{{identity}}", config.http_port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("REST server stopped: {e}");
        }
    });

    // ── Channels ────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(telegram) = config.telegram {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if telegram.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                telegram.allowed_users.join(", ")
            }
        );
        let channel = TelegramChannel::new(telegram.bot_token, telegram.allowed_users);
        if let Err(e) = channel.health_check().await {
            tracing::warn!("Telegram health check failed: {e}");
        }
        channels.add(Box::new(channel));
    }

    if config.cli_enabled {
        channels.add(Box::new(CliChannel::new()));
    }

    if channels.is_empty() {
        anyhow::bail!("no channel enabled: set TELEGRAM_BOT_TOKEN or CVILO_CLI=true");
    }
    eprintln!("   Channels: {}\n", channels.names().join(", "));

    // ── Delivery ────────────────────────────────────────────────────────
    let driver = Arc::new(ConversationDriver::new(store, resumes).with_style(config.resume_style));
    DeliveryLoop::new(driver, channels, config.delivery)
        .run()
        .await?;

    if let Some(handle) = sweeper_handle {
        handle.abort();
    }
    Ok(())
}
