// 定时拉取调度器
//
// 启动后立即拉取一次，之后按间隔（±20% 抖动）拉取，拉到的任务全部提交到任务队列

use crate::engine::TaskQueue;
use crate::source::TaskSource;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 最小拉取间隔
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// 抖动比例
const JITTER_FACTOR: f64 = 0.2;

pub struct PollScheduler {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollScheduler {
    /// 启动调度
    pub fn start(source: Arc<dyn TaskSource>, queue: TaskQueue, interval: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            Self::run(source, queue, interval, token).await;
        });
        info!("任务拉取已启动: 间隔={:?}", interval);
        Self {
            cancel_token,
            handle,
        }
    }

    async fn run(
        source: Arc<dyn TaskSource>,
        queue: TaskQueue,
        base_interval: Duration,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                submitted = Self::poll_once(source.as_ref(), &queue) => {
                    if submitted > 0 {
                        info!("本轮提交任务数: {}", submitted);
                    }
                }
            }

            let next = Self::add_jitter(base_interval, JITTER_FACTOR);
            debug!("下次拉取: {:?} 后", next);
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = tokio::time::sleep(next) => {}
            }
        }
        debug!("任务拉取已退出");
    }

    /// 拉取一次并提交，返回提交成功的任务数
    pub async fn poll_once(source: &dyn TaskSource, queue: &TaskQueue) -> usize {
        let tasks = match source.fetch_pending().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("拉取待上传任务失败: {:#}", e);
                return 0;
            }
        };

        let mut submitted = 0;
        for task in tasks {
            let target_key = task.target_key;
            match queue.submit(task).await {
                Ok(()) => submitted += 1,
                Err(e) => warn!("任务提交失败: target_key={}, 错误: {}", target_key, e),
            }
        }
        submitted
    }

    /// 添加随机抖动
    fn add_jitter(base: Duration, jitter_factor: f64) -> Duration {
        let base_secs = base.as_secs_f64();
        let jitter_range = base_secs * jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base_secs + jitter).max(MIN_INTERVAL.as_secs_f64()))
    }

    /// 停止调度
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.handle.await {
            error!("任务拉取退出异常: {}", e);
        }
        info!("任务拉取已停止");
    }
}
