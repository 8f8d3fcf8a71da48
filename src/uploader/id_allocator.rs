// 远端 ID 分配
//
// 按单次上限分批请求 ID；远端返回不足时继续补齐，直到数量满足或调用失败。
// 对调用方是全有或全无：不会返回部分结果

use crate::drive::{DriveError, RemoteStoreClient};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// 连续多少次未拿到任何新 ID 后放弃
const MAX_EMPTY_ROUNDS: u32 = 3;

/// ID 分配错误
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("生成 ID 请求失败: {0}")]
    Drive(#[from] DriveError),

    #[error("连续 {rounds} 次未获得新 ID，仍缺少 {missing} 个")]
    Exhausted { rounds: u32, missing: usize },
}

/// ID 分配器
#[derive(Clone)]
pub struct IdAllocator {
    client: RemoteStoreClient,
}

impl IdAllocator {
    pub fn new(client: RemoteStoreClient) -> Self {
        Self { client }
    }

    /// 分配 n 个互不相同的 ID
    pub async fn allocate(&self, n: usize) -> Result<Vec<String>, AllocationError> {
        let mut ids = Vec::with_capacity(n);
        let mut seen = HashSet::with_capacity(n);
        let mut empty_rounds = 0u32;

        while ids.len() < n {
            let remaining = n - ids.len();
            let batch = self.client.generate_ids(remaining).await?;
            let received = batch.len();

            let before = ids.len();
            for id in batch {
                if ids.len() == n {
                    break;
                }
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            let fresh = ids.len() - before;

            debug!(
                "生成 ID: 请求={}, 返回={}, 新增={}, 累计={}/{}",
                remaining.min(self.client.max_ids_per_request()),
                received,
                fresh,
                ids.len(),
                n
            );

            if fresh == 0 {
                empty_rounds += 1;
                warn!("生成 ID 未返回新 ID（第 {} 次）", empty_rounds);
                if empty_rounds >= MAX_EMPTY_ROUNDS {
                    return Err(AllocationError::Exhausted {
                        rounds: empty_rounds,
                        missing: n - ids.len(),
                    });
                }
            } else {
                empty_rounds = 0;
            }
        }

        Ok(ids)
    }

    /// 分配单个 ID
    pub async fn allocate_one(&self) -> Result<String, AllocationError> {
        match self.client.generate_id().await? {
            Some(id) => Ok(id),
            None => Err(AllocationError::Exhausted {
                rounds: 1,
                missing: 1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{ApiLimiter, MemoryBackend};
    use std::sync::Arc;

    fn allocator_for(backend: Arc<MemoryBackend>, max_per_request: usize) -> IdAllocator {
        let client = RemoteStoreClient::new(backend, ApiLimiter::new(3))
            .with_max_ids_per_request(max_per_request);
        IdAllocator::new(client)
    }

    #[tokio::test]
    async fn test_allocate_tops_up_partial_responses() {
        // 远端每次最多返回 7 个
        let backend = Arc::new(MemoryBackend::new().with_id_batch_limit(7));
        let allocator = allocator_for(backend.clone(), 1000);

        let ids = allocator.allocate(25).await.unwrap();
        assert_eq!(ids.len(), 25);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 25);
        assert_eq!(backend.generate_calls(), 4);
    }

    #[tokio::test]
    async fn test_allocate_respects_request_cap() {
        let backend = Arc::new(MemoryBackend::new());
        let allocator = allocator_for(backend.clone(), 10);

        let ids = allocator.allocate(35).await.unwrap();
        assert_eq!(ids.len(), 35);
        assert_eq!(backend.generate_calls(), 4);
    }

    #[tokio::test]
    async fn test_allocate_zero() {
        let backend = Arc::new(MemoryBackend::new());
        let allocator = allocator_for(backend.clone(), 10);
        assert!(allocator.allocate(0).await.unwrap().is_empty());
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_allocate_fails_on_error() {
        let backend = Arc::new(MemoryBackend::new());
        let allocator = allocator_for(backend.clone(), 1000);
        backend.fail_next_generate_calls(1);

        let result = allocator.allocate(8).await;
        assert!(matches!(result, Err(AllocationError::Drive(_))));
    }

    #[tokio::test]
    async fn test_allocate_gives_up_on_empty_responses() {
        let backend = Arc::new(MemoryBackend::new().with_id_batch_limit(0));
        let allocator = allocator_for(backend.clone(), 1000);

        let result = allocator.allocate(3).await;
        assert!(matches!(
            result,
            Err(AllocationError::Exhausted { rounds: 3, missing: 3 })
        ));
        assert_eq!(backend.generate_calls(), 3);
    }
}
