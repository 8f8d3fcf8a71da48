//! 用户会话
//!
//! `TransferContext` 持有进程内共享的 API 限流器与传输池（启动时创建一次），
//! `DriveSession` 把用户名、目录数据库和远端客户端绑定在一起，提供：
//! - 上传文件：计算哈希 → 分配文件 ID → 创建分组目录 → 分片上传 → 写入清单
//! - 下载文件：读取清单 → 分片下载合并 → 校验哈希
//! - 目录管理与带绝对路径的列表

use crate::catalog::{
    resolve_directory_paths, Catalog, DirectoryIndex, DirectoryPath, FileManifest, FileRecord,
    ManifestChunk,
};
use crate::common::sha256_file;
use crate::config::TransferConfig;
use crate::downloader::{DownloadEngine, DownloadReport, DownloadSettings, Reassembler};
use crate::drive::{ApiLimiter, DriveBackend, RemoteStoreClient};
use crate::transfer::{ChunkOutcome, TransferError, TransferObserver, TransferPool};
use crate::uploader::{UploadEngine, UploadSettings};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 目录名只允许字母、数字、连字符和下划线
const DIRECTORY_NAME_PATTERN: &str = r"^[a-zA-Z0-9_\-]+$";

pub fn is_valid_directory_name(name: &str) -> bool {
    Regex::new(DIRECTORY_NAME_PATTERN)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// 共享的传输资源
#[derive(Clone)]
pub struct TransferContext {
    client: RemoteStoreClient,
    pool: TransferPool,
    config: TransferConfig,
}

impl TransferContext {
    pub fn new(
        backend: Arc<dyn DriveBackend>,
        config: TransferConfig,
        max_ids_per_request: usize,
    ) -> Self {
        let limiter = ApiLimiter::new(config.api_concurrency);
        let client = RemoteStoreClient::new(backend, limiter)
            .with_max_ids_per_request(max_ids_per_request)
            .with_speed_window(config.speed_window());
        Self {
            client,
            pool: TransferPool::new(config.concurrent_transfers),
            config,
        }
    }

    pub fn client(&self) -> &RemoteStoreClient {
        &self.client
    }

    pub fn pool(&self) -> &TransferPool {
        &self.pool
    }

    pub fn upload_engine(&self) -> UploadEngine {
        UploadEngine::new(
            self.client.clone(),
            self.pool.clone(),
            UploadSettings {
                max_chunk_size: self.config.max_chunk_size,
                chunk_stream_size: self.config.chunk_stream_size,
                shuffle: self.config.shuffle_uploads,
                speed_window: self.config.speed_window(),
            },
        )
    }

    pub fn download_engine(&self) -> DownloadEngine {
        DownloadEngine::new(Reassembler::new(
            self.client.clone(),
            self.pool.clone(),
            DownloadSettings {
                temp_dir: self.config.temp_dir.clone(),
                speed_window: self.config.speed_window(),
            },
        ))
    }
}

/// 带绝对路径的文件
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub record: FileRecord,
    pub absolute_path: String,
}

/// 上传结果
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub record: FileRecord,
    pub manifest: FileManifest,
    /// 按 index 排序
    pub outcomes: Vec<ChunkOutcome>,
}

impl UploadReport {
    pub fn failed_chunks(&self) -> Vec<&ChunkOutcome> {
        self.outcomes.iter().filter(|o| o.error).collect()
    }
}

/// 用户会话
pub struct DriveSession {
    username: String,
    catalog: Arc<dyn Catalog>,
    context: TransferContext,
    root_directory_name: String,
    root_id: OnceCell<String>,
}

impl DriveSession {
    pub fn new(
        username: impl Into<String>,
        catalog: Arc<dyn Catalog>,
        context: TransferContext,
        root_directory_name: impl Into<String>,
    ) -> Result<Self, TransferError> {
        let username = username.into();
        catalog.upsert_user(&username)?;
        Ok(Self {
            username,
            catalog,
            context,
            root_directory_name: root_directory_name.into(),
            root_id: OnceCell::new(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// 远端根目录 ID（首次调用时确保唯一）
    pub async fn root_directory_id(&self) -> Result<String, TransferError> {
        let id = self
            .root_id
            .get_or_try_init(|| {
                self.context
                    .client()
                    .ensure_root_directory(&self.root_directory_name)
            })
            .await?;
        Ok(id.clone())
    }

    /// 创建目录
    pub fn create_directory(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, TransferError> {
        let name = name.trim();
        if !is_valid_directory_name(name) {
            return Err(TransferError::InvalidDirectoryName(name.to_string()));
        }
        if let Some(parent) = parent_id {
            self.ensure_directory(parent)?;
        }
        if self
            .catalog
            .directory_exists(name, parent_id, &self.username)?
        {
            return Err(TransferError::DirectoryExists(name.to_string()));
        }
        Ok(self
            .catalog
            .create_directory(name, &self.username, parent_id)?)
    }

    fn ensure_directory(&self, id: &str) -> Result<(), TransferError> {
        let found = self
            .catalog
            .list_directories(&self.username)?
            .iter()
            .any(|d| d.id == id);
        if found {
            Ok(())
        } else {
            Err(TransferError::DirectoryNotFound(id.to_string()))
        }
    }

    /// 所有目录及其绝对路径
    pub fn list_directories(&self) -> Result<Vec<DirectoryPath>, TransferError> {
        let directories = self.catalog.list_directories(&self.username)?;
        Ok(resolve_directory_paths(&directories).map_err(crate::catalog::CatalogError::from)?)
    }

    /// 所有文件及其绝对路径
    pub fn list_files(&self) -> Result<Vec<FileEntry>, TransferError> {
        let directories = self.catalog.list_directories(&self.username)?;
        let index = DirectoryIndex::new(&directories);

        self.catalog
            .list_files(&self.username)?
            .into_iter()
            .map(|record| {
                let absolute_path = index
                    .file_path(record.parent_id.as_deref(), &record.name)
                    .map_err(crate::catalog::CatalogError::from)?;
                Ok(FileEntry {
                    record,
                    absolute_path,
                })
            })
            .collect()
    }

    /// 上传本地文件到目录（None 表示顶层）
    ///
    /// 部分分片失败时仍写入清单，失败分片没有远端 ID；调用方根据 outcomes 决定是否重传
    pub async fn upload_file(
        &self,
        source: &Path,
        directory_id: Option<&str>,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError> {
        if let Some(dir) = directory_id {
            self.ensure_directory(dir)?;
        }

        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| TransferError::FileNotFound(source.display().to_string()))?;

        let content_hash = sha256_file(source).await?;
        let engine = self.context.upload_engine();

        // 文件 ID 同时作为远端分组目录 ID
        let file_id = engine.allocator().allocate_one().await?;
        let root_id = self.root_directory_id().await?;
        self.context
            .client()
            .create_directory(&file_id, Some(&file_id), Some(&root_id))
            .await?;

        let result = engine
            .upload_file(source, Some(&file_id), observer, cancel)
            .await?;

        let manifest = FileManifest {
            id: file_id,
            name,
            size: result.total_size,
            parent_id: directory_id.map(str::to_string),
            owner: self.username.clone(),
            content_hash: Some(content_hash),
            chunks: result
                .outcomes
                .iter()
                .map(|o| ManifestChunk {
                    index: o.chunk.index,
                    id: o.chunk.id.clone(),
                    remote_id: o.remote_id.clone(),
                    size: o.chunk.size(),
                })
                .collect(),
        };

        let record = self.catalog.create_file(&manifest)?;
        if result.is_complete() {
            info!("文件上传完成: {} ({})", manifest.name, manifest.id);
        } else {
            warn!(
                "文件已登记但有 {} 个分片失败: {} ({})",
                result.failed_chunks().count(),
                manifest.name,
                manifest.id
            );
        }

        Ok(UploadReport {
            record,
            manifest,
            outcomes: result.outcomes,
        })
    }

    /// 下载文件到本地路径
    pub async fn download_file(
        &self,
        file_id: &str,
        dest: &Path,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, TransferError> {
        let manifest = self
            .catalog
            .get_file(file_id, &self.username)?
            .ok_or_else(|| TransferError::FileNotFound(file_id.to_string()))?;

        self.context
            .download_engine()
            .download_to_path(&manifest, dest, observer, cancel)
            .await
    }
}
