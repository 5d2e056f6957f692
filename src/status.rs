// 上传结果回写
//
// 每个终态决策（成功或最终失败）调用一次，限流重新入队时不调用

use crate::uploader::FileType;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// 上传结果接收方
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// 记录上传结果
    async fn report_outcome(
        &self,
        target_key: i64,
        file_type: FileType,
        file_key: &str,
        success: bool,
    ) -> Result<()>;
}

/// 只输出日志的结果接收方
#[derive(Debug, Default, Clone)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn report_outcome(
        &self,
        target_key: i64,
        file_type: FileType,
        file_key: &str,
        success: bool,
    ) -> Result<()> {
        info!(
            "上传结果: target_key={}, type={}, file_key={}, success={}",
            target_key, file_type, file_key, success
        );
        Ok(())
    }
}

/// 单条结果记录
#[derive(Debug, Serialize)]
struct OutcomeRecord<'a> {
    target_key: i64,
    file_type: FileType,
    file_key: &'a str,
    success: bool,
    reported_at: String,
}

/// 以 JSON Lines 形式追加写入文件的结果接收方
#[derive(Debug)]
pub struct JsonlStatusSink {
    path: PathBuf,
    /// 串行化写入，保证每行完整
    write_lock: Mutex<()>,
}

impl JsonlStatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl StatusSink for JsonlStatusSink {
    async fn report_outcome(
        &self,
        target_key: i64,
        file_type: FileType,
        file_key: &str,
        success: bool,
    ) -> Result<()> {
        let record = OutcomeRecord {
            target_key,
            file_type,
            file_key,
            success,
            reported_at: chrono::Local::now().to_rfc3339(),
        };
        let mut line = serde_json::to_string(&record).context("序列化上传结果失败")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("创建结果目录失败")?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("打开结果文件失败: {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .context("写入上传结果失败")?;
        file.flush().await.context("写入上传结果失败")?;

        info!(
            "上传结果已记录: target_key={}, file_key={}, success={}",
            target_key, file_key, success
        );
        Ok(())
    }
}
