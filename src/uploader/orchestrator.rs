// 上传调度
//
// 根据接口类型和文件大小选择上传方式，解释上传结果：
// - 成功：上报成功
// - 限流：原样重新入队，不上报
// - 其他失败：交给重试策略决定是否上报、是否补偿

use crate::config::{InterfaceType, ObjectConfig};
use crate::engine::TaskExecutor;
use crate::error::UploadError;
use crate::status::StatusSink;
use crate::storage::ObjectStoreApi;
use crate::uploader::multipart::MultipartUploader;
use crate::uploader::retry::{RetryAction, RetryPolicy};
use crate::uploader::single::SingleShotUploader;
use crate::uploader::UploadTask;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 上传方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// 临时地址直传
    Presigned,
    /// 平台接口单次上传
    RelaySingle,
    /// 平台接口分段上传
    RelayMultipart,
}

/// 选择上传方式
///
/// 平台接口下文件大小达到阈值（含等于）时使用分段上传
pub fn select_path(interface: InterfaceType, file_size: u64, threshold: u64) -> UploadPath {
    match interface {
        InterfaceType::S3 => UploadPath::Presigned,
        InterfaceType::Platform if file_size >= threshold => UploadPath::RelayMultipart,
        InterfaceType::Platform => UploadPath::RelaySingle,
    }
}

/// 上传调度器
pub struct UploadOrchestrator {
    config: Arc<ObjectConfig>,
    single: SingleShotUploader,
    multipart: MultipartUploader,
    sink: Arc<dyn StatusSink>,
    policy: RetryPolicy,
}

impl UploadOrchestrator {
    pub fn new(
        config: Arc<ObjectConfig>,
        api: Arc<dyn ObjectStoreApi>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let multipart = MultipartUploader::new(
            api.clone(),
            config.section_size_bytes(),
            config.part_concurrency,
            config.chunk_dir(),
        );
        let policy = RetryPolicy::new(config.max_retries, config.auto_compensate);
        Self {
            single: SingleShotUploader::new(api),
            multipart,
            sink,
            policy,
            config,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 执行一次上传
    pub async fn upload(&self, task: &UploadTask) -> Result<(), UploadError> {
        let file_size = tokio::fs::metadata(&task.file_path)
            .await
            .map_err(|e| UploadError::file(&task.file_path, e))?
            .len();

        let path = select_path(
            self.config.interface_type,
            file_size,
            self.config.fragment_threshold_bytes(),
        );
        debug!(
            "上传方式: target_key={}, size={}, path={:?}",
            task.target_key, file_size, path
        );

        match path {
            UploadPath::Presigned => self.single.presigned_upload(task).await,
            UploadPath::RelaySingle => self.single.relay_upload(task).await,
            UploadPath::RelayMultipart => self.multipart.upload(task, file_size).await,
        }
    }

    /// 执行上传并解释结果，返回任务的后续处理动作
    pub async fn process(&self, task: &UploadTask) -> RetryAction {
        match self.upload(task).await {
            Ok(()) => {
                info!(
                    "上传成功: target_key={}, file_key={}, attempt={}",
                    task.target_key, task.file_key, task.attempt
                );
                self.report(task, true).await;
                RetryAction::Done
            }
            Err(e) if e.is_rate_limited() => {
                warn!(
                    "上传被限流，重新入队: target_key={}, file_key={}",
                    task.target_key, task.file_key
                );
                self.policy.on_rate_limited()
            }
            Err(e) => {
                error!(
                    "上传失败: target_key={}, file_key={}, attempt={}, code={}, 错误: {}",
                    task.target_key,
                    task.file_key,
                    task.attempt,
                    e.code(),
                    e
                );
                let decision = self.policy.on_failure(task);
                if decision.report_failure {
                    self.report(task, false).await;
                }
                decision.action
            }
        }
    }

    async fn report(&self, task: &UploadTask, success: bool) {
        if let Err(e) = self
            .sink
            .report_outcome(task.target_key, task.file_type, &task.file_key, success)
            .await
        {
            error!(
                "上传结果回写失败: target_key={}, success={}, 错误: {:#}",
                task.target_key, success, e
            );
        }
    }
}

#[async_trait]
impl TaskExecutor for UploadOrchestrator {
    async fn execute(&self, task: &UploadTask) -> RetryAction {
        self.process(task).await
    }
}
