// 上传分片规划
//
// 分片规则：
// - 分片数 = ceil(文件大小 / 最大分片大小)，空文件没有分片
// - 第 i 个分片覆盖 [i * max, min(size, (i + 1) * max))
// - 每个分片预先分配一个远端 ID，分配完成后不再改变

use crate::transfer::{
    Chunk, ChunkPlan, ChunkingProgress, TransferError, TransferObserver,
};
use crate::uploader::id_allocator::IdAllocator;
use std::ops::Range;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 默认最大分片大小: 1MB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// 默认分片读取缓冲大小: 1KB
pub const DEFAULT_CHUNK_STREAM_SIZE: usize = 1024;

/// 计算分片的字节范围
pub fn plan_ranges(total_size: u64, max_chunk_size: u64) -> Vec<Range<u64>> {
    let max_chunk_size = max_chunk_size.max(1);
    let mut ranges = Vec::with_capacity(total_size.div_ceil(max_chunk_size) as usize);
    let mut offset = 0u64;

    while offset < total_size {
        let end = std::cmp::min(offset + max_chunk_size, total_size);
        ranges.push(offset..end);
        offset = end;
    }

    ranges
}

/// 分片规划器
pub struct ChunkPlanner<'a> {
    allocator: &'a IdAllocator,
    max_chunk_size: u64,
}

impl<'a> ChunkPlanner<'a> {
    pub fn new(allocator: &'a IdAllocator, max_chunk_size: u64) -> Self {
        Self {
            allocator,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// 规划分片并分配 ID
    ///
    /// 批量分配失败或数量不足时，逐个为缺失的分片单独分配；单独分配也失败则整体失败
    pub async fn plan(
        &self,
        total_size: u64,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let ranges = plan_ranges(total_size, self.max_chunk_size);
        let total_chunks = ranges.len();

        info!(
            "规划分片: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size, self.max_chunk_size, total_chunks
        );

        let mut ids = match self.allocator.allocate(total_chunks).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("批量分配 ID 失败，改为逐个分配: {}", e);
                Vec::new()
            }
        };

        let mut chunks = Vec::with_capacity(total_chunks);
        for (index, range) in ranges.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let id = match ids.get(index) {
                Some(id) => id.clone(),
                None => {
                    let id = self.allocator.allocate_one().await?;
                    ids.push(id.clone());
                    id
                }
            };

            chunks.push(Chunk::new(index, id, range));
            observer.on_chunking_progress(&ChunkingProgress {
                index,
                total_chunks,
            });
        }

        observer.on_chunking_complete(&ChunkPlan {
            total_size,
            chunks: chunks.clone(),
        });

        Ok(chunks)
    }
}
