// 分片传输类型定义

use crate::catalog::CatalogError;
use crate::drive::DriveError;
use crate::transfer::pool::PoolError;
use crate::uploader::AllocationError;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// 分片任务状态
///
/// 等待传输池/限流器槽位期间不发事件；START 之后为 InFlight，随后 Done 或 Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 传输中
    InFlight,
    Done,
    Failed,
}

/// 分片描述
///
/// 规划完成后不再修改，index 在文件内从 0 连续编号
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 分片索引（合并顺序）
    pub index: usize,
    /// 预分配的远端对象 ID
    pub id: String,
    /// 源文件中的字节范围（不含 end）
    pub range: Range<u64>,
}

impl Chunk {
    pub fn new(index: usize, id: impl Into<String>, range: Range<u64>) -> Self {
        Self {
            index,
            id: id.into(),
            range,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }
}

/// 单个分片的传输结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkOutcome {
    pub error: bool,
    /// 上传成功后远端返回的 ID（失败时为空）
    pub remote_id: Option<String>,
    pub chunk: Chunk,
    /// 失败原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChunkOutcome {
    pub fn succeeded(chunk: Chunk, remote_id: Option<String>) -> Self {
        Self {
            error: false,
            remote_id,
            chunk,
            reason: None,
        }
    }

    pub fn failed(chunk: Chunk, reason: impl Into<String>) -> Self {
        Self {
            error: true,
            remote_id: None,
            chunk,
            reason: Some(reason.into()),
        }
    }

    pub fn state(&self) -> TaskState {
        if self.error {
            TaskState::Failed
        } else {
            TaskState::Done
        }
    }
}

/// 传输错误
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("分配远端 ID 失败: {0}")]
    Allocation(#[from] AllocationError),

    #[error("云端存储错误: {0}")]
    Drive(#[from] DriveError),

    #[error("目录数据库错误: {0}")]
    Catalog(#[from] CatalogError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("分片 #{index} ({id}) 传输失败: {reason}")]
    ChunkFailed {
        index: usize,
        id: String,
        reason: String,
    },

    #[error("分片 #{index} 缺少远端 ID")]
    MissingChunk { index: usize },

    #[error("合并分片失败: {0}")]
    Reassembly(String),

    #[error("传输已取消")]
    Cancelled,

    #[error("文件校验失败: 期望 {expected}, 实际 {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("无效的目录名: {0}（只允许字母、数字、连字符和下划线）")]
    InvalidDirectoryName(String),

    #[error("目录已存在: {0}")]
    DirectoryExists(String),

    #[error("目录不存在: {0}")]
    DirectoryNotFound(String),

    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("传输池错误: {0}")]
    Pool(String),
}

impl From<PoolError> for TransferError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => TransferError::Cancelled,
            other => TransferError::Pool(other.to_string()),
        }
    }
}
