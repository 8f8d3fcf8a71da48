// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::common::DEFAULT_SPEED_WINDOW_MS;
use crate::drive::google::{DEFAULT_API_BASE_URL, DEFAULT_TOKEN_URL, DEFAULT_UPLOAD_BASE_URL};
use crate::drive::{OAuthCredentials, DEFAULT_API_CONCURRENCY, DEFAULT_MAX_IDS_PER_REQUEST};
use crate::transfer::DEFAULT_CONCURRENT_TRANSFERS;
use crate::uploader::{DEFAULT_CHUNK_STREAM_SIZE, DEFAULT_MAX_CHUNK_SIZE};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 覆盖 refresh token 的环境变量
pub const REFRESH_TOKEN_ENV: &str = "CHUNKDRIVE_REFRESH_TOKEN";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 分片传输配置
    #[serde(default)]
    pub transfer: TransferConfig,
    /// 云端存储配置
    #[serde(default)]
    pub drive: DriveConfig,
    /// 目录数据库配置
    #[serde(default)]
    pub catalog: CatalogConfig,
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

/// 分片传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// 最大分片大小（字节）
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// 分片读取缓冲大小（字节）
    #[serde(default = "default_chunk_stream_size")]
    pub chunk_stream_size: usize,
    /// 分片传输并发上限
    #[serde(default = "default_concurrent_transfers")]
    pub concurrent_transfers: usize,
    /// API 调用并发上限
    #[serde(default = "default_api_concurrency")]
    pub api_concurrency: usize,
    /// 是否打乱上传顺序
    #[serde(default = "default_shuffle_uploads")]
    pub shuffle_uploads: bool,
    /// 下载临时文件目录（为空时使用系统临时目录）
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// 速度采样窗口（毫秒）
    #[serde(default = "default_speed_window_ms")]
    pub speed_window_ms: u64,
}

fn default_max_chunk_size() -> u64 {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_chunk_stream_size() -> usize {
    DEFAULT_CHUNK_STREAM_SIZE
}

fn default_concurrent_transfers() -> usize {
    DEFAULT_CONCURRENT_TRANSFERS
}

fn default_api_concurrency() -> usize {
    DEFAULT_API_CONCURRENCY
}

fn default_shuffle_uploads() -> bool {
    true
}

fn default_speed_window_ms() -> u64 {
    DEFAULT_SPEED_WINDOW_MS
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            chunk_stream_size: default_chunk_stream_size(),
            concurrent_transfers: default_concurrent_transfers(),
            api_concurrency: default_api_concurrency(),
            shuffle_uploads: default_shuffle_uploads(),
            temp_dir: None,
            speed_window_ms: default_speed_window_ms(),
        }
    }
}

impl TransferConfig {
    /// 校验数值配置
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size 必须大于 0".to_string());
        }
        if self.chunk_stream_size == 0 {
            return Err("chunk_stream_size 必须大于 0".to_string());
        }
        if self.concurrent_transfers == 0 {
            return Err("concurrent_transfers 必须大于 0".to_string());
        }
        if self.api_concurrency == 0 {
            return Err("api_concurrency 必须大于 0".to_string());
        }
        if self.speed_window_ms == 0 {
            return Err("speed_window_ms 必须大于 0".to_string());
        }
        Ok(())
    }

    pub fn speed_window(&self) -> Duration {
        Duration::from_millis(self.speed_window_ms)
    }
}

/// 云端存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// 存储根目录名称
    #[serde(default = "default_root_directory_name")]
    pub root_directory_name: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_upload_base_url")]
    pub upload_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// 外部获取的 refresh token（环境变量优先）
    #[serde(default)]
    pub refresh_token: String,
    /// 单次生成 ID 的上限
    #[serde(default = "default_max_ids_per_request")]
    pub max_ids_per_request: usize,
    /// 元数据请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_root_directory_name() -> String {
    "Courses".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_upload_base_url() -> String {
    DEFAULT_UPLOAD_BASE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_max_ids_per_request() -> usize {
    DEFAULT_MAX_IDS_PER_REQUEST
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            root_directory_name: default_root_directory_name(),
            api_base_url: default_api_base_url(),
            upload_base_url: default_upload_base_url(),
            token_url: default_token_url(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            max_ids_per_request: default_max_ids_per_request(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl DriveConfig {
    /// 构建 OAuth 凭据，环境变量中的 refresh token 优先
    pub fn credentials(&self) -> OAuthCredentials {
        self.credentials_with(std::env::var(REFRESH_TOKEN_ENV).ok())
    }

    fn credentials_with(&self, env_token: Option<String>) -> OAuthCredentials {
        let refresh_token = env_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.refresh_token.clone());
        OAuthCredentials {
            token_url: self.token_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 目录数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// SQLite 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// 未指定用户时使用的用户名
    #[serde(default = "default_username")]
    pub default_username: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

fn default_username() -> String {
    "default".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_username: default_username(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .transfer
            .validate()
            .map_err(|e| anyhow::anyhow!("配置文件中的传输参数无效: {}", e))?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.transfer
            .validate()
            .map_err(|e| anyhow::anyhow!("保存配置失败: {}", e))?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.transfer.max_chunk_size, 1024 * 1024);
        assert_eq!(config.transfer.chunk_stream_size, 1024);
        assert_eq!(config.transfer.concurrent_transfers, 3);
        assert_eq!(config.transfer.api_concurrency, 3);
        assert!(config.transfer.shuffle_uploads);
        assert_eq!(config.drive.root_directory_name, "Courses");
        assert_eq!(config.drive.max_ids_per_request, 1000);
        assert!(config.transfer.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [transfer]
            max_chunk_size = 4096
            shuffle_uploads = false

            [drive]
            root_directory_name = "Backups"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.transfer.max_chunk_size, 4096);
        assert!(!config.transfer.shuffle_uploads);
        assert_eq!(config.transfer.concurrent_transfers, 3);
        assert_eq!(config.drive.root_directory_name, "Backups");
        assert_eq!(config.catalog.db_path, PathBuf::from("data/catalog.db"));
        assert!(config.log.enabled);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut transfer = TransferConfig::default();
        transfer.concurrent_transfers = 0;
        assert!(transfer.validate().is_err());

        let mut transfer = TransferConfig::default();
        transfer.max_chunk_size = 0;
        assert!(transfer.validate().is_err());
    }

    #[test]
    fn test_env_token_overrides_config() {
        let mut drive = DriveConfig::default();
        drive.refresh_token = "from-file".to_string();

        assert_eq!(drive.credentials_with(None).refresh_token, "from-file");
        assert_eq!(
            drive
                .credentials_with(Some("from-env".to_string()))
                .refresh_token,
            "from-env"
        );
        assert_eq!(
            drive.credentials_with(Some("  ".to_string())).refresh_token,
            "from-file"
        );
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.transfer.max_chunk_size = 2048;
        config.catalog.default_username = "alice".to_string();
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.transfer.max_chunk_size, 2048);
        assert_eq!(loaded.catalog.default_username, "alice");
    }

    #[tokio::test]
    async fn test_load_or_default_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let path = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path).await;
        assert_eq!(config.transfer.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert!(std::path::Path::new(path).exists());
    }
}
