//! 分片传输池
//!
//! 限制同时执行的分片上传/下载任务数，与 API 调用限流器相互独立。
//! 克隆共享同一组槽位，同一进程内的多个文件传输互相竞争。
//!
//! - 任务之间互不影响，单个任务失败不会取消其他任务
//! - 取消后尚未获得槽位的任务不再执行，已开始的任务运行到结束

use crate::common::ConcurrencyGauge;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 默认传输并发数
pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 3;

/// 传输池错误
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("传输已取消")]
    Cancelled,

    #[error("传输池已关闭")]
    Closed,

    #[error("分片任务异常退出: {0}")]
    TaskPanicked(String),
}

/// 分片传输池
#[derive(Debug, Clone)]
pub struct TransferPool {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    gauge: ConcurrencyGauge,
}

impl TransferPool {
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        info!("创建分片传输池，并发上限: {}", ceiling);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            gauge: ConcurrencyGauge::new(),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.in_flight()
    }

    /// 观测到的最大并发数
    pub fn peak(&self) -> usize {
        self.gauge.peak()
    }

    /// 执行所有任务，按提交顺序返回结果
    ///
    /// 任务自身的成功/失败由 T 表达；只有取消或任务 panic 时返回 Err
    pub async fn run_all<T, F>(
        &self,
        tasks: Vec<F>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut set = JoinSet::new();

        for (slot, task) in tasks.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            let gauge = self.gauge.clone();
            let cancel = cancel.clone();
            let ceiling = self.ceiling;

            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (slot, None),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (slot, None),
                    },
                };

                let guard = gauge.enter();
                debug!(
                    "分片任务开始: slot={}, in_flight={}/{}",
                    slot,
                    guard.current(),
                    ceiling
                );

                let output = task.await;

                drop(guard);
                drop(permit);
                (slot, Some(output))
            });
        }

        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, output)) => results[slot] = output,
                Err(e) => return Err(PoolError::TaskPanicked(e.to_string())),
            }
        }

        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        results
            .into_iter()
            .map(|r| r.ok_or(PoolError::Closed))
            .collect()
    }
}

impl Default for TransferPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENT_TRANSFERS)
    }
}
