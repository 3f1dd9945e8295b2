//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    // 构建 Prometheus recorder
    let builder = PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    // 注册服务级别的标签
    register_common_metrics(&config.service_name);

    // 启动指标 HTTP 服务器
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通知投递相关指标
fn register_common_metrics(service_name: &str) {
    // 这些描述会出现在 /metrics 端点的 HELP 注释中
    metrics::describe_counter!(
        "notification_dispatch_total",
        "Total number of dispatch requests by outcome"
    );
    metrics::describe_histogram!(
        "notification_dispatch_duration_seconds",
        "Dispatch duration in seconds"
    );

    metrics::describe_counter!(
        "notification_channel_sends_total",
        "Total number of channel send attempts"
    );
    metrics::describe_histogram!(
        "notification_channel_send_duration_seconds",
        "Channel adapter send duration in seconds"
    );

    metrics::describe_counter!(
        "notification_rate_limited_total",
        "Total number of sends rejected by the rate limiter"
    );

    metrics::describe_counter!(
        "notification_queue_items_total",
        "Total number of queue items processed by result"
    );
    metrics::describe_gauge!(
        "notification_queue_last_run_timestamp",
        "Unix timestamp of the last queue processing run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录宏和函数
// ============================================================================

/// 记录一次 dispatch 的结果（dispatched / no_channels / rate_limited / error）
#[inline]
pub fn record_dispatch(notification_type: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "notification_dispatch_total",
        "type" => notification_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_dispatch_duration_seconds",
        "type" => notification_type.to_string()
    )
    .record(duration_secs);
}

/// 记录单渠道发送
#[inline]
pub fn record_channel_send(channel: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "notification_channel_sends_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_channel_send_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录频控拒绝
#[inline]
pub fn record_rate_limited() {
    metrics::counter!("notification_rate_limited_total").increment(1);
}

/// 记录队列条目处理结果（sent / retry / failed / deferred / expired / reclaimed）
#[inline]
pub fn record_queue_item(result: &str) {
    metrics::counter!(
        "notification_queue_items_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// 更新队列最后一次运行时间
#[inline]
pub fn set_queue_last_run(timestamp_secs: f64) {
    metrics::gauge!("notification_queue_last_run_timestamp").set(timestamp_secs);
}
