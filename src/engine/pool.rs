// Worker 池
//
// - W 个 worker 共享同一个接收端，任意 worker 可以处理任意任务
// - 队列有界，队列满时 submit 等待（背压）
// - 任务 panic 只影响当前任务，worker 继续服务
// - 重新入队由独立的后台任务发送，worker 不会阻塞在自己的队列上

use crate::engine::TaskExecutor;
use crate::error::EngineError;
use crate::status::StatusSink;
use crate::uploader::{RetryAction, RetryPolicy, UploadTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 任务队列句柄
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<UploadTask>,
    policy: RetryPolicy,
    /// 限流后重新入队前的等待时间
    rate_limit_backoff: Duration,
    cancel: CancellationToken,
    /// 重新入队失败的任务在这里记为失败
    sink: Arc<dyn StatusSink>,
}

impl TaskQueue {
    /// 提交任务，队列满时等待
    pub async fn submit(&self, task: UploadTask) -> Result<(), EngineError> {
        if !self.policy.accepts(&task) {
            return Err(EngineError::AttemptLimitExceeded {
                attempt: task.attempt,
                max: self.policy.max_retries,
            });
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Closed);
        }
        self.tx.send(task).await.map_err(|_| EngineError::Closed)
    }

    /// 补偿：执行次数未达上限时，以 attempt + 1 重新提交
    ///
    /// 返回 false 时由调用方将任务记为最终失败
    pub async fn compensate(&self, task: &UploadTask) -> bool {
        if !self.policy.can_compensate(task) {
            warn!(
                "任务执行次数已达上限，不再补偿: target_key={}, attempt={}, max={}",
                task.target_key, task.attempt, self.policy.max_retries
            );
            return false;
        }

        let next = task.next_attempt();
        info!(
            "补偿任务: target_key={}, attempt={}",
            next.target_key, next.attempt
        );
        match self.submit(next).await {
            Ok(()) => true,
            Err(e) => {
                warn!("补偿任务提交失败: target_key={}, 错误: {}", task.target_key, e);
                false
            }
        }
    }

    /// 执行任务返回的处理动作
    fn apply(&self, task: UploadTask, action: RetryAction) {
        match action {
            RetryAction::Done => {}
            RetryAction::RequeueUnchanged => {
                debug!("任务被限流，重新入队: target_key={}", task.target_key);
                self.resend(task.requeued(), self.rate_limit_backoff);
            }
            RetryAction::RequeueWithIncrement => {
                self.resend(task.next_attempt(), Duration::ZERO);
            }
            RetryAction::Drop => {
                debug!(
                    "任务已丢弃: target_key={}, attempt={}",
                    task.target_key, task.attempt
                );
            }
        }
    }

    fn resend(&self, task: UploadTask, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            let target_key = task.target_key;
            let file_type = task.file_type;
            let file_key = task.file_key.clone();
            let attempt = task.attempt;
            let result = tokio::select! {
                _ = queue.cancel.cancelled() => Err(EngineError::Closed),
                result = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    queue.submit(task).await
                } => result,
            };
            if let Err(e) = result {
                error!(
                    "任务重新入队失败，记为失败: target_key={}, file_key={}, attempt={}, 错误: {}",
                    target_key, file_key, attempt, e
                );
                if let Err(e) = queue
                    .sink
                    .report_outcome(target_key, file_type, &file_key, false)
                    .await
                {
                    error!(
                        "上传结果回写失败: target_key={}, success=false, 错误: {:#}",
                        target_key, e
                    );
                }
            }
        });
    }
}

/// Worker 池
pub struct WorkerPool {
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// 启动 worker 池
    ///
    /// # 参数
    /// * `workers` - worker 数量
    /// * `capacity` - 队列容量
    /// * `executor` - 任务执行者
    /// * `policy` - 重试策略
    /// * `rate_limit_backoff` - 限流后重新入队前的等待时间
    /// * `sink` - 重新入队失败时上报失败结果
    pub fn start(
        workers: usize,
        capacity: usize,
        executor: Arc<dyn TaskExecutor>,
        policy: RetryPolicy,
        rate_limit_backoff: Duration,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let queue = TaskQueue {
            tx,
            policy,
            rate_limit_backoff,
            cancel: cancel.clone(),
            sink,
        };

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    rx.clone(),
                    executor.clone(),
                    queue.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(
            "任务引擎已启动: workers={}, capacity={}, max_retries={}, auto_compensate={}",
            workers,
            capacity.max(1),
            policy.max_retries,
            policy.auto_compensate
        );

        Self {
            queue,
            workers: handles,
            cancel,
        }
    }

    /// 获取队列句柄
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    /// 停止引擎，正在执行的任务会执行完
    pub async fn shutdown(self) {
        info!("正在停止任务引擎...");
        self.cancel.cancel();
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("worker 退出异常: {}", e);
            }
        }
        info!("任务引擎已停止");
    }
}

async fn run_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
    executor: Arc<dyn TaskExecutor>,
    queue: TaskQueue,
    cancel: CancellationToken,
) {
    debug!("worker #{} 已启动", id);
    loop {
        let task = {
            let mut receiver = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                receiver = rx.lock() => receiver,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = receiver.recv() => task,
            }
        };
        let Some(task) = task else {
            break;
        };

        debug!(
            "worker #{} 开始执行任务: target_key={}, attempt={}",
            id, task.target_key, task.attempt
        );
        // 单独 spawn，任务 panic 时只得到 JoinError
        let running = {
            let executor = executor.clone();
            let task = task.clone();
            tokio::spawn(async move { executor.execute(&task).await })
        };
        match running.await {
            Ok(action) => queue.apply(task, action),
            Err(e) => {
                error!(
                    "worker #{} 任务执行异常，已丢弃: target_key={}, file_key={}, 错误: {}",
                    id, task.target_key, task.file_key, e
                );
            }
        }
    }
    debug!("worker #{} 已退出", id);
}
