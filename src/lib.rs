// Object Cloud Uploader
// 对象存储上传服务核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 错误类型
pub mod error;

// 对象存储接口模块
pub mod storage;

// 上传模块
pub mod uploader;

// 任务执行引擎
pub mod engine;

// 上传结果回写
pub mod status;

// 任务来源
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

// 导出常用类型
pub use config::{AppConfig, InterfaceType, ObjectConfig};
pub use engine::{TaskExecutor, TaskQueue, WorkerPool};
pub use error::{EngineError, UploadError};
pub use source::{ManifestTaskSource, PollScheduler, TaskSource};
pub use status::{JsonlStatusSink, LogStatusSink, StatusSink};
pub use storage::{ObjectClient, ObjectStoreApi};
pub use uploader::{
    select_path, FileType, PartResult, RetryAction, RetryPolicy, UploadOrchestrator, UploadPath,
    UploadTask,
};
