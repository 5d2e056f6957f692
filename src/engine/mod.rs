// 任务执行引擎
//
// 固定数量的 worker 共享一个有界队列，每个 worker 同一时间只执行一个任务

pub mod pool;

pub use pool::{TaskQueue, WorkerPool};

use crate::uploader::{RetryAction, UploadTask};
use async_trait::async_trait;

/// 任务执行者
///
/// 返回值决定任务后续如何处理（结束、重新入队或丢弃）
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &UploadTask) -> RetryAction;
}
