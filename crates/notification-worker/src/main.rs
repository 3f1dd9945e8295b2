//! 通知 Worker 入口
//!
//! 装配通知服务后按配置的间隔驱动重试队列，收到关闭信号后处理完当前批次再退出。

use anyhow::Result;
use notification_worker::{QueueScheduler, build_service};
use notify_shared::{config::AppConfig, observability};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. 加载配置：config/default.toml -> 环境 -> 服务专属 -> NOTIFY_ 环境变量
    let config = AppConfig::load("notification-worker").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-worker...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 装配服务
    let (service, db) = build_service(&config).await?;
    let scheduler = QueueScheduler::new(
        service.queue_processor(),
        config.notification.queue_poll_interval(),
    );

    // 4. 调度循环，收到信号后通知其退出
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        warn!("调度器已提前退出");
    }
    if let Err(e) = worker.await {
        warn!(error = %e, "调度任务异常结束");
    }

    db.close().await;
    info!("Worker shutdown complete");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
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
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
