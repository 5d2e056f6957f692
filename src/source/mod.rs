// 任务来源模块
//
// - manifest: 从目录中的清单文件领取待上传任务
// - poll: 定时拉取任务并提交到任务队列

pub mod manifest;
pub mod poll;

pub use manifest::ManifestTaskSource;
pub use poll::PollScheduler;

use crate::uploader::UploadTask;
use anyhow::Result;
use async_trait::async_trait;

/// 待上传任务来源
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// 拉取待上传任务，同一任务只返回一次
    async fn fetch_pending(&self) -> Result<Vec<UploadTask>>;
}
