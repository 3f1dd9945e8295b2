//! 队列调度循环

use std::time::Duration;

use chrono::Utc;
use notification_service::QueueProcessor;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// 以固定间隔触发一次队列处理，直到收到关闭信号
///
/// 多实例部署时由仓储层的行锁保证同一条目不会被重复领取。
pub struct QueueScheduler {
    processor: QueueProcessor,
    poll_interval: Duration,
}

impl QueueScheduler {
    pub fn new(processor: QueueProcessor, poll_interval: Duration) -> Self {
        Self {
            processor,
            poll_interval,
        }
    }

    /// 执行一轮处理，错误只记录不中断循环
    pub async fn tick(&self) -> usize {
        match self.processor.process_queue(Utc::now()).await {
            Ok(claimed) => {
                if claimed > 0 {
                    debug!(claimed, "本轮队列处理完成");
                }
                claimed
            }
            Err(e) => {
                error!(error = %e, "队列处理出错");
                0
            }
        }
    }

    /// 主循环
    ///
    /// 当前轮次处理完才检查关闭信号，已领取的条目不会半途丢弃
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "队列调度器已启动");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("队列调度器已停止");
    }
}
