// 上传模块
//
// - task: 上传任务与分段结果
// - chunk: 文件分段与临时文件管理
// - single: 单次上传（临时地址直传 / 平台接口）
// - multipart: 分段上传会话
// - retry: 限流、失败与补偿策略
// - orchestrator: 选择上传方式并解释结果

pub mod chunk;
pub mod multipart;
pub mod orchestrator;
pub mod retry;
pub mod single;
pub mod task;

pub use chunk::{ChunkFile, ChunkPlan, ChunkSet, ChunkSpec};
pub use multipart::{MultipartUploader, SessionState, UploadSession};
pub use orchestrator::{select_path, UploadOrchestrator, UploadPath};
pub use retry::{FailureDecision, RetryAction, RetryPolicy};
pub use single::SingleShotUploader;
pub use task::{FileType, PartResult, UploadTask};
