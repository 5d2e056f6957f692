// 分段文件管理
//
// 大文件按固定大小切分成临时文件，分段序号从 1 开始，最后一段无论大小都标记为末段。
// 临时文件归 ChunkSet 所有，会话结束时必须全部删除。

use crate::error::UploadError;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 读写缓冲区大小: 1MB
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// 分段规划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    /// 分段序号（从 1 开始）
    pub part_number: u32,
    /// 字节范围
    pub range: Range<u64>,
    /// 是否为最后一段
    pub last: bool,
}

impl ChunkSpec {
    /// 分段大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 分段在源文件中的起始位置
    pub fn offset(&self) -> u64 {
        self.range.start
    }
}

/// 按段大小计算全部分段
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    /// 计算分段
    ///
    /// # 参数
    /// * `file_size` - 文件大小
    /// * `section_size` - 每段大小（必须大于 0）
    pub fn new(file_size: u64, section_size: u64) -> Self {
        let section_size = section_size.max(1);
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1u32;

        while offset < file_size {
            let end = std::cmp::min(offset + section_size, file_size);
            chunks.push(ChunkSpec {
                part_number,
                range: offset..end,
                last: false,
            });
            offset = end;
            part_number += 1;
        }

        if let Some(last) = chunks.last_mut() {
            last.last = true;
        }

        Self { chunks }
    }

    pub fn chunks(&self) -> &[ChunkSpec] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 已写入磁盘的分段
#[derive(Debug, Clone)]
pub struct ChunkFile {
    pub spec: ChunkSpec,
    /// 临时文件路径
    pub path: PathBuf,
}

/// 一次分段会话的全部临时文件
///
/// 正常流程调用 `cleanup`；未清理时 Drop 兜底删除
#[derive(Debug)]
pub struct ChunkSet {
    files: Vec<ChunkFile>,
}

impl ChunkSet {
    /// 将源文件切分为临时文件
    ///
    /// 任意一段写入失败时，已经生成的临时文件会随 ChunkSet 一起删除
    pub async fn split(
        source: &Path,
        file_key: &str,
        plan: &ChunkPlan,
        temp_dir: &Path,
    ) -> Result<Self, UploadError> {
        tokio::fs::create_dir_all(temp_dir)
            .await
            .map_err(|e| UploadError::file(temp_dir, e))?;

        let mut source_file = File::open(source)
            .await
            .map_err(|e| UploadError::file(source, e))?;

        let prefix = format!("{}.{}", sanitize_key(file_key), Uuid::new_v4().simple());
        let mut set = Self {
            files: Vec::with_capacity(plan.len()),
        };

        for spec in plan.chunks() {
            let path = temp_dir.join(format!("{}.part{}", prefix, spec.part_number));
            // 先登记再写入，写到一半失败也能被清理
            set.files.push(ChunkFile {
                spec: spec.clone(),
                path: path.clone(),
            });
            copy_range(&mut source_file, source, &path, spec).await?;
        }

        info!(
            "文件分段完成: {:?}, 分段数={}, 临时目录={:?}",
            source,
            set.files.len(),
            temp_dir
        );
        Ok(set)
    }

    pub fn files(&self) -> &[ChunkFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 删除全部临时文件
    pub async fn cleanup(mut self) {
        for file in self.files.drain(..) {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => debug!("删除分段文件: {:?}", file.path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("删除分段文件失败: {:?}, 错误: {}", file.path, e),
            }
        }
    }
}

impl Drop for ChunkSet {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            if let Err(e) = std::fs::remove_file(&file.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("删除分段文件失败: {:?}, 错误: {}", file.path, e);
                }
            }
        }
    }
}

/// 将源文件中的一段复制到临时文件
async fn copy_range(
    source_file: &mut File,
    source: &Path,
    target: &Path,
    spec: &ChunkSpec,
) -> Result<(), UploadError> {
    source_file
        .seek(std::io::SeekFrom::Start(spec.offset()))
        .await
        .map_err(|e| UploadError::file(source, e))?;

    let mut target_file = File::create(target)
        .await
        .map_err(|e| UploadError::file(target, e))?;

    let mut remaining = spec.size();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(remaining as usize).max(1)];

    while remaining > 0 {
        let want = buffer.len().min(remaining as usize);
        let n = source_file
            .read(&mut buffer[..want])
            .await
            .map_err(|e| UploadError::file(source, e))?;
        if n == 0 {
            return Err(UploadError::file(
                source,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "源文件长度不足"),
            ));
        }
        target_file
            .write_all(&buffer[..n])
            .await
            .map_err(|e| UploadError::file(target, e))?;
        remaining -= n as u64;
    }

    target_file
        .flush()
        .await
        .map_err(|e| UploadError::file(target, e))?;

    debug!(
        "写入分段 #{}: bytes={}-{}, 文件={:?}",
        spec.part_number,
        spec.range.start,
        spec.range.end.saturating_sub(1),
        target
    );
    Ok(())
}

/// 文件 key 中可能包含路径分隔符，转换为安全的文件名
fn sanitize_key(file_key: &str) -> String {
    let name: String = file_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if name.is_empty() {
        "chunk".to_string()
    } else {
        name
    }
}
