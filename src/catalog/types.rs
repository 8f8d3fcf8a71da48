// 目录数据库类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 目录树存在环
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("目录树存在环: 从 {start} 出发再次到达 {repeated}")]
pub struct CyclicDirectoryError {
    /// 开始解析的目录
    pub start: String,
    /// 第二次访问到的目录
    pub repeated: String,
}

/// 目录数据库错误
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("获取数据库锁失败")]
    Lock,

    #[error("清单无效: {0}")]
    InvalidManifest(String),

    #[error("记录已存在: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Cyclic(#[from] CyclicDirectoryError),
}

/// 目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    pub name: String,
    /// 没有父目录表示顶层目录
    pub parent_id: Option<String>,
    pub owner: String,
}

/// 清单中的分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChunk {
    pub index: usize,
    /// 预分配的分片 ID
    pub id: String,
    /// 上传成功时远端返回的 ID，失败的分片为空
    pub remote_id: Option<String>,
    pub size: u64,
}

/// 文件清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// 文件 ID（同时是远端分组目录的 ID）
    pub id: String,
    pub name: String,
    pub size: u64,
    pub parent_id: Option<String>,
    pub owner: String,
    /// 内容的 SHA-256（十六进制）
    pub content_hash: Option<String>,
    /// 按 index 升序
    pub chunks: Vec<ManifestChunk>,
}

impl FileManifest {
    /// 检查分片 index 从 0 连续且大小之和等于文件大小
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(CatalogError::InvalidManifest(format!(
                    "分片 index 不连续: 位置 {} 的 index 为 {}",
                    position, chunk.index
                )));
            }
        }

        let sum: u64 = self.chunks.iter().map(|c| c.size).sum();
        if sum != self.size {
            return Err(CatalogError::InvalidManifest(format!(
                "分片大小之和 {} 与文件大小 {} 不一致",
                sum, self.size
            )));
        }

        Ok(())
    }

    /// 是否所有分片都已上传成功
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.remote_id.is_some())
    }
}

/// 文件记录（不含分片）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub parent_id: Option<String>,
    pub owner: String,
    pub content_hash: Option<String>,
    pub chunk_count: usize,
    /// Unix 时间戳（秒）
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(sizes: &[u64], total: u64) -> FileManifest {
        FileManifest {
            id: "f1".to_string(),
            name: "a.bin".to_string(),
            size: total,
            parent_id: None,
            owner: "alice".to_string(),
            content_hash: None,
            chunks: sizes
                .iter()
                .enumerate()
                .map(|(index, size)| ManifestChunk {
                    index,
                    id: format!("c{}", index),
                    remote_id: Some(format!("c{}", index)),
                    size: *size,
                })
                .collect(),
        }
    }

    #[test]
    fn test_validate_accepts_consistent_manifest() {
        assert!(manifest(&[1000, 1000, 500], 2500).validate().is_ok());
        assert!(manifest(&[], 0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_size_mismatch() {
        assert!(manifest(&[1000, 400], 2500).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_gap() {
        let mut m = manifest(&[1000, 1000, 500], 2500);
        m.chunks[2].index = 3;
        assert!(matches!(
            m.validate(),
            Err(CatalogError::InvalidManifest(_))
        ));
    }
}
