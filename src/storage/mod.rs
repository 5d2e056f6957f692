// 对象存储接口模块

pub mod client;
pub mod types;

pub use client::ObjectClient;
pub use types::*;

use crate::error::UploadError;
use crate::uploader::PartResult;
use async_trait::async_trait;
use std::path::Path;

/// 对象存储远端接口
///
/// 上传逻辑只依赖这个 trait，HTTP 细节由 [`ObjectClient`] 实现
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// 获取临时上传地址
    async fn presigned_url(&self, file_key: &str) -> Result<String, UploadError>;

    /// 通过临时上传地址上传文件
    async fn put_presigned(&self, url: &str, path: &Path) -> Result<(), UploadError>;

    /// 通过平台接口上传整个文件
    async fn relay_upload(&self, file_key: &str, path: &Path) -> Result<(), UploadError>;

    /// 分段上传初始化，返回 uploadId
    async fn multipart_init(&self, file_key: &str) -> Result<String, UploadError>;

    /// 上传单个分段
    async fn upload_part(&self, file_key: &str, part: &PartUpload)
        -> Result<PartResult, UploadError>;

    /// 完成分段上传
    async fn multipart_complete(
        &self,
        file_key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<(), UploadError>;

    /// 取消分段上传
    async fn multipart_abort(&self, file_key: &str, upload_id: &str) -> Result<(), UploadError>;
}
