// 错误类型定义
//
// 上传链路统一使用 UploadError，按来源分为：
// - 传输错误（超时、连接失败、非 200、JSON 格式错误）
// - 文件错误（源文件或分段文件无法打开/读取）
// - 业务错误（接口返回的非成功 code，其中 A2105 为限流）

use std::path::PathBuf;
use thiserror::Error;

/// 接口成功码
pub const CODE_SUCCESS: &str = "00000";

/// 接口限流码（不消耗重试次数，原样重新入队）
pub const CODE_RATE_LIMITED: &str = "A2105";

/// 传输层通用失败码（与业务码区分）
pub const CODE_TRANSPORT_FAILURE: &str = "E0001";

/// 文件读写失败码
pub const CODE_FILE_FAILURE: &str = "E0002";

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 网络层错误（连接失败、超时等）
    #[error("请求发送失败: {0}")]
    Transport(#[from] reqwest::Error),

    /// HTTP 状态码非 200
    #[error("HTTP 状态码异常: {0}")]
    HttpStatus(u16),

    /// 响应体无法解析
    #[error("响应解析失败: {0}")]
    Decode(String),

    /// 文件读写错误
    #[error("文件操作失败: {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 请求被限流
    #[error("请求被限流 (code={})", CODE_RATE_LIMITED)]
    RateLimited,

    /// 业务失败
    #[error("接口返回失败: code={0}")]
    Business(String),

    /// 分段上传初始化失败（未获取到 uploadId）
    #[error("分段上传初始化失败: {0}")]
    InitFailed(String),

    /// 分段上传失败
    #[error("第 {part_number} 段上传失败: {reason}")]
    PartFailed { part_number: u32, reason: String },
}

impl UploadError {
    /// 构造文件错误
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::File {
            path: path.into(),
            source,
        }
    }

    /// 根据接口返回的 code 构造错误（成功码不应走到这里）
    pub fn from_code(code: &str) -> Self {
        match code {
            CODE_RATE_LIMITED => UploadError::RateLimited,
            other => UploadError::Business(other.to_string()),
        }
    }

    /// 对应的结果码，用于日志
    pub fn code(&self) -> String {
        match self {
            UploadError::Transport(_) | UploadError::HttpStatus(_) | UploadError::Decode(_) => {
                CODE_TRANSPORT_FAILURE.to_string()
            }
            UploadError::File { .. } => CODE_FILE_FAILURE.to_string(),
            UploadError::RateLimited => CODE_RATE_LIMITED.to_string(),
            UploadError::Business(code) => code.clone(),
            UploadError::InitFailed(_) | UploadError::PartFailed { .. } => {
                CODE_TRANSPORT_FAILURE.to_string()
            }
        }
    }

    /// 是否为限流
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UploadError::RateLimited)
    }
}

/// 任务引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 任务队列已关闭
    #[error("任务队列已关闭")]
    Closed,

    /// 执行次数超过上限
    #[error("任务执行次数 {attempt} 超过上限 {max}")]
    AttemptLimitExceeded { attempt: u32, max: u32 },
}
