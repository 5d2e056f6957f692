// 上传任务定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 文件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// DICOM 影像
    Dcm,
    /// 图片
    Jpg,
    /// 其他文件
    Other,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Dcm => write!(f, "dcm"),
            FileType::Jpg => write!(f, "jpg"),
            FileType::Other => write!(f, "other"),
        }
    }
}

/// 上传任务
///
/// 由外部任务源创建，只有补偿时才会增加 `attempt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadTask {
    /// 目标记录 key
    pub target_key: i64,
    /// 对象存储中的文件 key
    pub file_key: String,
    /// 本地文件路径
    pub file_path: PathBuf,
    /// 文件类型
    pub file_type: FileType,
    /// 执行次数（从 1 开始）
    #[serde(default = "default_attempt")]
    pub attempt: u32,
}

fn default_attempt() -> u32 {
    1
}

impl UploadTask {
    /// 创建新的上传任务（第一次执行）
    pub fn new(
        target_key: i64,
        file_key: impl Into<String>,
        file_path: impl Into<PathBuf>,
        file_type: FileType,
    ) -> Self {
        Self {
            target_key,
            file_key: file_key.into(),
            file_path: file_path.into(),
            file_type,
            attempt: default_attempt(),
        }
    }

    /// 原样重新入队的副本（限流时使用，不增加执行次数）
    pub fn requeued(&self) -> Self {
        self.clone()
    }

    /// 下一次执行的副本（补偿时使用）
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// 单个分段的上传结果
///
/// 完成接口按分段序号升序提交全部结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    /// 分段序号（从 1 开始）
    pub part_number: u32,
    /// 服务端返回的 etag
    pub etag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = UploadTask::new(7, "study/1.dcm", "/data/1.dcm", FileType::Dcm);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.file_type.to_string(), "dcm");
    }

    #[test]
    fn test_requeue_keeps_attempt() {
        let mut task = UploadTask::new(7, "k", "/data/k", FileType::Dcm);
        task.attempt = 2;

        assert_eq!(task.requeued(), task);

        let next = task.next_attempt();
        assert_eq!(next.attempt, 3);
        assert_eq!(next.target_key, task.target_key);
        assert_eq!(next.file_key, task.file_key);
    }

    #[test]
    fn test_deserialize_without_attempt() {
        let json = r#"{"target_key":1,"file_key":"a","file_path":"/a","file_type":"jpg"}"#;
        let task: UploadTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.attempt, 1);
        assert_eq!(task.file_type, FileType::Jpg);
    }

    #[test]
    fn test_part_result_wire_format() {
        let part = PartResult {
            part_number: 3,
            etag: "abc".to_string(),
        };
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["partNumber"], 3);
        assert_eq!(value["etag"], "abc");
    }
}
