// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "UPLOADER_CONFIG";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 工作池配置
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 对象存储配置
    #[serde(default)]
    pub object: ObjectConfig,
    /// 任务轮询配置
    #[serde(default)]
    pub poll: PollConfig,
    /// 上传结果回写配置
    #[serde(default)]
    pub status: StatusConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 工作池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// 最大工作线程数（同时执行的上传任务数）
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// 任务队列容量，0 表示与工作线程数一致
    #[serde(default)]
    pub queue_capacity: usize,
    /// 限流后重新入队前的等待时间（毫秒）
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
}

fn default_max_threads() -> usize {
    4
}

fn default_rate_limit_backoff_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            queue_capacity: 0,
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
        }
    }
}

impl WorkerConfig {
    /// 实际使用的队列容量
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            self.max_threads.max(1)
        } else {
            self.queue_capacity
        }
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }
}

/// 上传接口类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// 通过临时地址直传对象存储
    S3,
    /// 通过平台接口转发
    #[default]
    Platform,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// 上传接口类型
    #[serde(default)]
    pub interface_type: InterfaceType,
    /// 访问密钥（请求头 accessKey）
    #[serde(default)]
    pub access_key: String,
    /// 资源ID
    #[serde(default)]
    pub res_id: String,
    /// 获取临时上传地址接口
    #[serde(default)]
    pub temp_get_upload_url: String,
    /// 单文件上传接口
    #[serde(default)]
    pub post_upload_url: String,
    /// 分段上传初始化接口
    #[serde(default)]
    pub multipart_init_url: String,
    /// 分段上传接口
    #[serde(default)]
    pub multipart_upload_url: String,
    /// 分段上传完成接口
    #[serde(default)]
    pub multipart_completion_url: String,
    /// 分段上传取消接口
    #[serde(default)]
    pub multipart_abortion_url: String,
    /// 启用分段上传的文件大小阈值 (MB)
    #[serde(default = "default_file_fragment_size_mb")]
    pub file_fragment_size_mb: u64,
    /// 每段大小 (MB)
    #[serde(default = "default_each_section_size_mb")]
    pub each_section_size_mb: u64,
    /// 最大执行次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 业务失败后是否自动补偿（重新入队并增加执行次数）
    #[serde(default)]
    pub auto_compensate: bool,
    /// 单个分段会话内同时上传的分段数，1 为顺序上传
    #[serde(default = "default_part_concurrency")]
    pub part_concurrency: usize,
    /// 临时上传地址有效期（毫秒）
    #[serde(default = "default_presigned_expire_ms")]
    pub presigned_expire_ms: u64,
    /// 连接超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 读写超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub read_timeout_secs: u64,
    /// 临时地址相关请求是否跳过证书校验
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    /// 分段临时文件目录，为空时使用系统临时目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

fn default_file_fragment_size_mb() -> u64 {
    100
}

fn default_each_section_size_mb() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_part_concurrency() -> usize {
    1
}

fn default_presigned_expire_ms() -> u64 {
    60_000
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_accept_invalid_certs() -> bool {
    true
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            interface_type: InterfaceType::default(),
            access_key: String::new(),
            res_id: String::new(),
            temp_get_upload_url: String::new(),
            post_upload_url: String::new(),
            multipart_init_url: String::new(),
            multipart_upload_url: String::new(),
            multipart_completion_url: String::new(),
            multipart_abortion_url: String::new(),
            file_fragment_size_mb: default_file_fragment_size_mb(),
            each_section_size_mb: default_each_section_size_mb(),
            max_retries: default_max_retries(),
            auto_compensate: false,
            part_concurrency: default_part_concurrency(),
            presigned_expire_ms: default_presigned_expire_ms(),
            connect_timeout_secs: default_timeout_secs(),
            read_timeout_secs: default_timeout_secs(),
            accept_invalid_certs: default_accept_invalid_certs(),
            temp_dir: None,
        }
    }
}

const BYTES_PER_MB: u64 = 1 << 20;

impl ObjectConfig {
    /// 分段上传阈值（字节）
    pub fn fragment_threshold_bytes(&self) -> u64 {
        self.file_fragment_size_mb.saturating_mul(BYTES_PER_MB)
    }

    /// 每段大小（字节）
    pub fn section_size_bytes(&self) -> u64 {
        self.each_section_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// 分段临时文件目录
    pub fn chunk_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.part_concurrency == 0 {
            anyhow::bail!("part_concurrency 必须大于 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries 必须大于 0");
        }

        let required: Vec<(&str, &str)> = match self.interface_type {
            InterfaceType::S3 => vec![("temp_get_upload_url", &self.temp_get_upload_url)],
            InterfaceType::Platform => {
                if self.file_fragment_size_mb == 0 {
                    anyhow::bail!("file_fragment_size_mb 必须大于 0");
                }
                if self.each_section_size_mb == 0 {
                    anyhow::bail!("each_section_size_mb 必须大于 0");
                }
                for (name, value) in [
                    ("file_fragment_size_mb", self.file_fragment_size_mb),
                    ("each_section_size_mb", self.each_section_size_mb),
                ] {
                    if value.checked_mul(BYTES_PER_MB).is_none() {
                        anyhow::bail!("{} 过大: {}", name, value);
                    }
                }
                vec![
                    ("post_upload_url", &self.post_upload_url),
                    ("multipart_init_url", &self.multipart_init_url),
                    ("multipart_upload_url", &self.multipart_upload_url),
                    ("multipart_completion_url", &self.multipart_completion_url),
                    ("multipart_abortion_url", &self.multipart_abortion_url),
                ]
            }
        };

        for (name, value) in required {
            if value.trim().is_empty() {
                anyhow::bail!(
                    "接口类型 {:?} 需要配置 {}",
                    self.interface_type,
                    name
                );
            }
        }

        Ok(())
    }
}

/// 任务轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// 是否启用轮询
    #[serde(default = "default_poll_enabled")]
    pub enabled: bool,
    /// 轮询间隔（秒）
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// 待上传任务清单目录
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: PathBuf,
}

fn default_poll_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from("pending")
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: default_poll_enabled(),
            interval_secs: default_poll_interval_secs(),
            manifest_dir: default_manifest_dir(),
        }
    }
}

/// 上传结果回写配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// 结果记录文件（JSON Lines）
    #[serde(default = "default_outcome_file")]
    pub outcome_file: PathBuf,
}

fn default_outcome_file() -> PathBuf {
    PathBuf::from("status/outcomes.jsonl")
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            outcome_file: default_outcome_file(),
        }
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_threads == 0 {
            anyhow::bail!("worker.max_threads 必须大于 0");
        }
        if self.poll.enabled && self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs 必须大于 0");
        }
        self.object.validate().context("object 配置无效")?;
        Ok(())
    }

    /// 配置文件路径（环境变量优先）
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建配置目录失败")?;
        }

        fs::write(path, content)
            .await
            .context("写入配置文件失败")?;

        tracing::info!("配置已保存: {:?}", path);
        Ok(())
    }
}
