// 对象存储接口数据类型

use crate::error::{UploadError, CODE_SUCCESS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::uploader::PartResult;

/// 统一响应结构 `{code, data}`
///
/// `data` 的结构因接口而异，先保留原始值，确认 code 成功后再按接口解析
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    /// 结果码
    pub code: String,
    /// 业务数据
    #[serde(default)]
    pub data: Value,
}

impl ApiEnvelope {
    /// 从响应体解析
    pub fn parse(body: &str) -> Result<Self, UploadError> {
        serde_json::from_str(body).map_err(|e| UploadError::Decode(format!("{}: {}", e, body)))
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// 只关心结果码的接口
    pub fn into_result(self) -> Result<(), UploadError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(UploadError::from_code(&self.code))
        }
    }

    /// 成功时按类型解析 data
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, UploadError> {
        if !self.is_success() {
            return Err(UploadError::from_code(&self.code));
        }
        serde_json::from_value(self.data).map_err(|e| UploadError::Decode(e.to_string()))
    }
}

/// 分段上传初始化返回
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    pub upload_id: String,
}

/// 分段上传返回
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartData {
    #[serde(default)]
    pub part_number: Option<u32>,
    pub etag: String,
}

/// 分段上传完成请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest<'a> {
    pub upload_id: &'a str,
    pub part_etags: &'a [PartResult],
}

/// 单个分段的上传参数
#[derive(Debug, Clone)]
pub struct PartUpload {
    /// 分段会话ID
    pub upload_id: String,
    /// 分段序号（从 1 开始）
    pub part_number: u32,
    /// 分段在源文件中的起始位置
    pub file_position: u64,
    /// 是否为最后一段
    pub last_part: bool,
    /// 分段临时文件
    pub path: PathBuf,
}
