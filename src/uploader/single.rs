// 单次上传
//
// - 临时地址直传：先获取临时上传地址，再 PUT 文件内容
// - 平台转发：multipart 表单一次性 POST 整个文件

use crate::error::UploadError;
use crate::storage::ObjectStoreApi;
use crate::uploader::UploadTask;
use std::sync::Arc;
use tracing::{debug, info};

/// 单次上传器
#[derive(Clone)]
pub struct SingleShotUploader {
    api: Arc<dyn ObjectStoreApi>,
}

impl SingleShotUploader {
    pub fn new(api: Arc<dyn ObjectStoreApi>) -> Self {
        Self { api }
    }

    /// 通过临时地址直传
    pub async fn presigned_upload(&self, task: &UploadTask) -> Result<(), UploadError> {
        debug!("开始获取临时地址: {}", task.file_key);
        let url = self.api.presigned_url(&task.file_key).await?;

        debug!("开始通过临时地址上传: {}", url);
        self.api.put_presigned(&url, &task.file_path).await?;

        info!("临时地址上传完成: target_key={}", task.target_key);
        Ok(())
    }

    /// 通过平台接口上传
    pub async fn relay_upload(&self, task: &UploadTask) -> Result<(), UploadError> {
        debug!("开始执行文件上传: {}", task.file_key);
        self.api
            .relay_upload(&task.file_key, &task.file_path)
            .await?;

        info!("平台接口上传完成: target_key={}", task.target_key);
        Ok(())
    }
}
