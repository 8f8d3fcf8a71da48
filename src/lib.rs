// ChunkDrive
// 把文件切成分片存进云端对象存储的分片传输库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 云端对象存储模块
pub mod drive;

// 分片传输公共模块（事件、进度、传输池）
pub mod transfer;

// 上传引擎模块
pub mod uploader;

// 下载引擎模块
pub mod downloader;

// 文件目录数据库模块
pub mod catalog;

// 用户会话
pub mod session;

// 公共模块
pub mod common;

// 导出常用类型
pub use catalog::{Catalog, CatalogError, Directory, DirectoryPath, FileManifest, FileRecord, SqliteCatalog};
pub use config::AppConfig;
pub use downloader::{DownloadEngine, DownloadReport, Reassembler};
pub use drive::{
    ApiLimiter, DriveBackend, DriveError, GoogleDriveBackend, MemoryBackend, RemoteStoreClient,
};
pub use session::{DriveSession, FileEntry, TransferContext, UploadReport};
pub use transfer::{
    ChannelObserver, ChunkEvent, ChunkEventKind, FileProgress, TransferError, TransferEvent,
    TransferObserver, TransferPool,
};
pub use uploader::{IdAllocator, UploadEngine, UploadResult};
