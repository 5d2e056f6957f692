// 清单文件任务来源
//
// 目录中的每个 `*.json` 文件是一个任务数组。领取时先重命名为 `*.json.claimed`，
// 再读取内容，重命名失败（已被其他进程领取）则跳过。

use crate::source::TaskSource;
use crate::uploader::UploadTask;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 清单文件扩展名
const MANIFEST_EXTENSION: &str = "json";

/// 已领取的清单文件扩展名
const CLAIMED_EXTENSION: &str = "json.claimed";

pub struct ManifestTaskSource {
    dir: PathBuf,
}

impl ManifestTaskSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 按文件名排序列出待领取的清单
    async fn list_manifests(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("读取清单目录失败: {:?}", self.dir))?;

        let mut manifests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION)
                && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false)
            {
                manifests.push(path);
            }
        }
        manifests.sort();
        Ok(manifests)
    }

    /// 领取单个清单，返回其中的任务
    async fn claim(&self, manifest: &Path) -> Result<Option<Vec<UploadTask>>> {
        let claimed = manifest.with_extension(CLAIMED_EXTENSION);
        if let Err(e) = tokio::fs::rename(manifest, &claimed).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                debug!("清单已被领取: {:?}", manifest);
                return Ok(None);
            }
            return Err(e).with_context(|| format!("领取清单失败: {:?}", manifest));
        }

        let content = tokio::fs::read_to_string(&claimed)
            .await
            .with_context(|| format!("读取清单失败: {:?}", claimed))?;
        let tasks: Vec<UploadTask> = serde_json::from_str(&content)
            .with_context(|| format!("解析清单失败: {:?}", claimed))?;
        Ok(Some(tasks))
    }
}

#[async_trait]
impl TaskSource for ManifestTaskSource {
    async fn fetch_pending(&self) -> Result<Vec<UploadTask>> {
        if !self.dir.exists() {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("创建清单目录失败: {:?}", self.dir))?;
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for manifest in self.list_manifests().await? {
            match self.claim(&manifest).await {
                Ok(Some(claimed)) => {
                    info!("领取清单: {:?}, 任务数={}", manifest, claimed.len());
                    tasks.extend(claimed);
                }
                Ok(None) => {}
                Err(e) => warn!("清单处理失败: {:#}", e),
            }
        }
        Ok(tasks)
    }
}
