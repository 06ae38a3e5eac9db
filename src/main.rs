use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use krishi_market::config::AppConfig;
use krishi_market::notifier::{NotificationQueue, NotificationWorker};
use krishi_market::repository::SqliteRepository;
use krishi_market::sms::NotificationGateway;
use krishi_market::{build_router, db, AppState};

// ========================================
// メイン
// ========================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = db::init_db(&config.db_path).await?;
    info!("📦 Database ready: {}", config.db_path);

    // SMS 通知ワーカー
    let gateway = NotificationGateway::from_config(&config.sms)?;
    let (queue, rx) = NotificationQueue::new(config.notify_queue_capacity);
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(NotificationWorker::new(rx, gateway).run(shutdown.clone()));

    let repo = Arc::new(SqliteRepository::new(pool));
    let state = Arc::new(AppState::new(repo, queue, config.search_limit));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("🚀 Krishi Market API listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // キュー済みの通知を送り切ってから終了
    shutdown.cancel();
    match tokio::time::timeout(config.shutdown_grace, worker).await {
        Ok(Ok(())) => info!("Notification worker drained"),
        Ok(Err(e)) => warn!("Notification worker panicked: {}", e),
        Err(_) => warn!(
            "Notification drain exceeded {:?}, pending SMS dropped",
            config.shutdown_grace
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
