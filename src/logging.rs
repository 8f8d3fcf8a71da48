//! 日志系统
//!
//! 控制台输出 + 可选的文件输出。日志文件按启动时间命名、超过大小上限时滚动，
//! 启动时删除超过保留天数的旧文件。

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "chunkdrive.";

const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 日志文件名：chunkdrive.<启动时间>.log，滚动文件带 _N 后缀
fn log_file_name(start_timestamp: &str, index: u32) -> String {
    if index == 0 {
        format!("{}{}.log", LOG_FILE_PREFIX, start_timestamp)
    } else {
        format!("{}{}_{}.log", LOG_FILE_PREFIX, start_timestamp, index)
    }
}

struct RotatingFile {
    start_timestamp: String,
    log_dir: PathBuf,
    file: File,
    index: u32,
    max_file_size: u64,
    written: u64,
}

impl RotatingFile {
    fn open(log_dir: PathBuf, max_file_size: u64, start_timestamp: String) -> io::Result<Self> {
        let file = Self::open_index(&log_dir, &start_timestamp, 0)?;
        Ok(Self {
            start_timestamp,
            log_dir,
            file,
            index: 0,
            max_file_size,
            written: 0,
        })
    }

    fn open_index(log_dir: &Path, start_timestamp: &str, index: u32) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(log_file_name(start_timestamp, index)))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 当前文件非空且写入后会超限时滚动
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            self.file.flush()?;
            self.index += 1;
            self.file = Self::open_index(&self.log_dir, &self.start_timestamp, self.index)?;
            self.written = 0;
        }

        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct LogFileManager {
    inner: Arc<Mutex<RotatingFile>>,
}

impl LogFileManager {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let start_timestamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        Self::with_timestamp(log_dir, max_file_size, start_timestamp)
    }

    fn with_timestamp(
        log_dir: PathBuf,
        max_file_size: u64,
        start_timestamp: String,
    ) -> io::Result<Self> {
        let file = RotatingFile::open(log_dir, max_file_size, start_timestamp)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for LogFileManager {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统（RUST_LOG 优先于配置中的级别）
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_writer(io::stderr);

    let file_writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| LogFileManager::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| eprintln!("日志文件不可用，只输出到控制台: {:?}: {}", config.log_dir, e))
            .ok()
    } else {
        None
    };

    let Some(file_manager) = file_writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_manager);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}",
        config.log_dir, config.retention_days, config.level
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 从日志文件名中取出日期（YYYY-MM-DD）
fn log_file_date(filename: &str) -> Option<NaiveDate> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    NaiveDate::parse_from_str(stem.get(..10)?, "%Y-%m-%d").ok()
}

/// 删除日期早于保留期的日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let retention = chrono::Duration::days(retention_days as i64);
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
            Ok(()) => {
                removed += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_names() {
        assert_eq!(
            log_file_name("2026-01-02-030405", 0),
            "chunkdrive.2026-01-02-030405.log"
        );
        assert_eq!(
            log_file_name("2026-01-02-030405", 3),
            "chunkdrive.2026-01-02-030405_3.log"
        );
    }

    #[test]
    fn test_log_file_date() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(log_file_date("chunkdrive.2026-01-02-030405.log"), Some(date));
        assert_eq!(log_file_date("chunkdrive.2026-01-02-030405_7.log"), Some(date));
        assert_eq!(log_file_date("other.2026-01-02.log"), None);
        assert_eq!(log_file_date("chunkdrive.bad.log"), None);
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager =
            LogFileManager::with_timestamp(dir.path().to_path_buf(), 10, "2026-01-02-000000".into())
                .unwrap();

        manager.write_all(b"12345678").unwrap();
        manager.write_all(b"abcdef").unwrap();
        manager.flush().unwrap();

        let first = fs::read(dir.path().join("chunkdrive.2026-01-02-000000.log")).unwrap();
        let second = fs::read(dir.path().join("chunkdrive.2026-01-02-000000_1.log")).unwrap();
        assert_eq!(first, b"12345678");
        assert_eq!(second, b"abcdef");
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("chunkdrive.2026-01-01-000000.log");
        let recent = dir.path().join("chunkdrive.2026-01-09-000000.log");
        let unrelated = dir.path().join("notes.txt");
        for path in [&old, &recent, &unrelated] {
            fs::write(path, b"x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 7, today), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }
}
