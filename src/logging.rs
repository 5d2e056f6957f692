//! 日志初始化
//!
//! 控制台 + 可选的文件输出。日志文件按启动时间命名，超过大小上限后滚动到下一个序号，
//! 启动时删除超过保留天数的旧文件。

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "object-uploader.";

/// 日志文件扩展名
const LOG_FILE_SUFFIX: &str = ".log";

const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 滚动写入状态
struct RotationState {
    log_dir: PathBuf,
    /// 启动时间戳（YYYY-MM-DD-HHMMSS）
    stamp: String,
    /// 当前序号，0 为首个文件
    index: u32,
    file: File,
    written: u64,
    max_file_size: u64,
}

impl RotationState {
    fn open(log_dir: PathBuf, stamp: String, max_file_size: u64) -> io::Result<Self> {
        let file = open_append(&log_file_path(&log_dir, &stamp, 0))?;
        Ok(Self {
            log_dir,
            stamp,
            index: 0,
            file,
            written: 0,
            max_file_size,
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            self.file.flush()?;
            self.index += 1;
            self.file = open_append(&log_file_path(&self.log_dir, &self.stamp, self.index))?;
            self.written = 0;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct RotatingLogWriter {
    state: Arc<Mutex<RotationState>>,
}

impl RotatingLogWriter {
    pub fn new(log_dir: impl Into<PathBuf>, max_file_size: u64) -> io::Result<Self> {
        let stamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        Self::with_stamp(log_dir.into(), stamp, max_file_size)
    }

    fn with_stamp(log_dir: PathBuf, stamp: String, max_file_size: u64) -> io::Result<Self> {
        let state = RotationState::open(log_dir, stamp, max_file_size)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// 日志文件路径: object-uploader.<stamp>.log / object-uploader.<stamp>_<N>.log
fn log_file_path(log_dir: &Path, stamp: &str, index: u32) -> PathBuf {
    let name = if index == 0 {
        format!("{}{}{}", LOG_FILE_PREFIX, stamp, LOG_FILE_SUFFIX)
    } else {
        format!("{}{}_{}{}", LOG_FILE_PREFIX, stamp, index, LOG_FILE_SUFFIX)
    };
    log_dir.join(name)
}

/// 日志守卫，进程退出前必须保持存活
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志
///
/// RUST_LOG 优先于配置中的级别；文件输出初始化失败时只输出到控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    let writer = if config.enabled {
        match fs::create_dir_all(&config.log_dir)
            .and_then(|_| RotatingLogWriter::new(&config.log_dir, config.max_file_size))
        {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!(
                    "日志文件初始化失败: {:?}, 错误: {}，仅输出到控制台",
                    config.log_dir, e
                );
                None
            }
        }
    } else {
        None
    };

    let Some(writer) = writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志初始化完成（仅控制台）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志初始化完成: 目录={:?}, 级别={}, 保留天数={}",
        config.log_dir, config.level, config.retention_days
    );

    let today = Local::now().date_naive();
    let removed = cleanup_expired_logs(&config.log_dir, config.retention_days, today);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 从文件名解析日期
fn log_file_date(file_name: &str) -> Option<NaiveDate> {
    let rest = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let date = rest.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// 删除过期日志，返回删除的文件数
fn cleanup_expired_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let retention = chrono::Duration::days(i64::from(retention_days));
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };
        if today.signed_duration_since(date) <= retention {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("删除过期日志失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_date() {
        assert_eq!(
            log_file_date("object-uploader.2026-03-01-101010.log"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(
            log_file_date("object-uploader.2026-03-01-101010_2.log"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(log_file_date("other.2026-03-01.log"), None);
        assert_eq!(log_file_date("object-uploader.bad.log"), None);
    }

    #[test]
    fn test_writer_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            RotatingLogWriter::with_stamp(dir.path().to_path_buf(), "2026-01-01-000000".into(), 10)
                .unwrap();

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"abc").unwrap();
        writer.write_all(b"defghijklmn").unwrap();
        writer.flush().unwrap();

        let read = |index| {
            std::fs::read_to_string(log_file_path(dir.path(), "2026-01-01-000000", index)).unwrap()
        };
        assert_eq!(read(0), "0123456789");
        assert_eq!(read(1), "abc");
        assert_eq!(read(2), "defghijklmn");
    }

    #[test]
    fn test_cleanup_expired_logs() {
        let dir = TempDir::new().unwrap();
        for name in [
            "object-uploader.2026-01-01-080000.log",
            "object-uploader.2026-01-01-080000_1.log",
            "object-uploader.2026-01-09-080000.log",
            "unrelated.log",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert_eq!(cleanup_expired_logs(dir.path(), 7, today), 2);

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec!["object-uploader.2026-01-09-080000.log", "unrelated.log"]
        );
    }
}
