// 分段上传
//
// 状态流转：Init → UploadingParts → Completed | Aborted
//
// - 初始化失败时不切分文件，也不发起任何分段请求
// - 分段按序号升序上传，遇到第一个失败分段立即停止，取消会话，不调用完成接口
// - 无论成功与否，本次会话产生的分段临时文件全部删除

use crate::error::UploadError;
use crate::storage::{ObjectStoreApi, PartUpload};
use crate::uploader::chunk::{ChunkPlan, ChunkSet};
use crate::uploader::{PartResult, UploadTask};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 分段会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 已获取 uploadId
    Init,
    /// 正在上传分段
    UploadingParts,
    /// 已完成
    Completed,
    /// 已取消
    Aborted,
}

/// 一次分段上传会话
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub state: SessionState,
    /// 按分段序号升序排列的上传结果
    pub results: Vec<PartResult>,
}

impl UploadSession {
    fn new(upload_id: String) -> Self {
        Self {
            upload_id,
            state: SessionState::Init,
            results: Vec::new(),
        }
    }

    fn transition(&mut self, file_key: &str, state: SessionState) {
        debug!(
            "分段会话状态变更: key={}, {:?} -> {:?}",
            file_key, self.state, state
        );
        self.state = state;
    }
}

/// 分段上传器
#[derive(Clone)]
pub struct MultipartUploader {
    api: Arc<dyn ObjectStoreApi>,
    /// 每段大小（字节）
    section_size: u64,
    /// 同一会话内的分段并发数，1 为顺序上传
    part_concurrency: usize,
    /// 分段临时文件目录
    temp_dir: PathBuf,
}

impl MultipartUploader {
    pub fn new(
        api: Arc<dyn ObjectStoreApi>,
        section_size: u64,
        part_concurrency: usize,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            section_size,
            part_concurrency: part_concurrency.max(1),
            temp_dir,
        }
    }

    /// 执行一次完整的分段上传
    pub async fn upload(&self, task: &UploadTask, file_size: u64) -> Result<(), UploadError> {
        let file_key = task.file_key.as_str();

        // 未拿到 uploadId 一律视为失败，限流也不例外
        let upload_id = self.api.multipart_init(file_key).await.map_err(|e| {
            warn!("分段上传初始化失败: key={}, code={}, 错误: {}", file_key, e.code(), e);
            match e {
                UploadError::InitFailed(_) => e,
                other => UploadError::InitFailed(format!("code={}, {}", other.code(), other)),
            }
        })?;
        let mut session = UploadSession::new(upload_id);
        info!(
            "分段上传初始化成功: key={}, uploadId={}",
            file_key, session.upload_id
        );

        let plan = ChunkPlan::new(file_size, self.section_size);
        let chunks = match ChunkSet::split(&task.file_path, file_key, &plan, &self.temp_dir).await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("文件分段失败: {:?}, 错误: {}", task.file_path, e);
                self.abort(file_key, &mut session).await;
                return Err(e);
            }
        };

        session.transition(file_key, SessionState::UploadingParts);
        let outcome = match self.upload_parts(file_key, &session.upload_id, &chunks).await {
            Ok(results) => {
                session.results = results;
                self.complete(file_key, &mut session).await
            }
            Err(e) => {
                error!("分段上传失败: key={}, 错误: {}", file_key, e);
                self.abort(file_key, &mut session).await;
                Err(e)
            }
        };

        chunks.cleanup().await;
        outcome
    }

    /// 上传全部分段，返回按序号升序排列的结果
    ///
    /// 遇到失败分段后不再发起后续分段
    async fn upload_parts(
        &self,
        file_key: &str,
        upload_id: &str,
        chunks: &ChunkSet,
    ) -> Result<Vec<PartResult>, UploadError> {
        let total = chunks.len();
        let requests: Vec<PartUpload> = chunks
            .files()
            .iter()
            .map(|chunk| PartUpload {
                upload_id: upload_id.to_string(),
                part_number: chunk.spec.part_number,
                file_position: chunk.spec.offset(),
                last_part: chunk.spec.last,
                path: chunk.path.clone(),
            })
            .collect();

        let api = self.api.clone();
        let key = file_key.to_string();
        let mut parts = stream::iter(requests)
            .map(move |part| {
                let api = api.clone();
                let key = key.clone();
                async move {
                    let result = api.upload_part(&key, &part).await;
                    (part.part_number, result)
                }
            })
            .buffered(self.part_concurrency);

        let mut results = Vec::with_capacity(total);
        while let Some((part_number, result)) = parts.next().await {
            match result {
                Ok(part) => {
                    debug!("分段上传成功: key={}, part={}/{}", file_key, part_number, total);
                    results.push(part);
                }
                Err(e) => {
                    return Err(UploadError::PartFailed {
                        part_number,
                        reason: format!("code={}, {}", e.code(), e),
                    });
                }
            }
        }
        Ok(results)
    }

    async fn complete(
        &self,
        file_key: &str,
        session: &mut UploadSession,
    ) -> Result<(), UploadError> {
        self.api
            .multipart_complete(file_key, &session.upload_id, &session.results)
            .await?;
        session.transition(file_key, SessionState::Completed);
        info!(
            "分段上传完成: key={}, 分段数={}",
            file_key,
            session.results.len()
        );
        Ok(())
    }

    /// 取消会话，返回结果不影响最终结果
    async fn abort(&self, file_key: &str, session: &mut UploadSession) {
        if let Err(e) = self.api.multipart_abort(file_key, &session.upload_id).await {
            warn!(
                "取消分段上传失败: key={}, uploadId={}, 错误: {}",
                file_key, session.upload_id, e
            );
        }
        session.results.clear();
        session.transition(file_key, SessionState::Aborted);
    }
}
