//! API 调用限流器
//!
//! 所有远程元数据/数据调用都要经过此闸门，与分片传输池的并发上限相互独立。
//! 在进程启动时创建一次，通过引用传给所有发起远程调用的组件。

use crate::common::ConcurrencyGauge;
use crate::drive::types::DriveError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// 默认 API 并发上限
pub const DEFAULT_API_CONCURRENCY: usize = 3;

/// API 调用限流器
#[derive(Debug, Clone)]
pub struct ApiLimiter {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    /// 执行中的调用数与峰值
    gauge: ConcurrencyGauge,
}

impl ApiLimiter {
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
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

    pub fn peak(&self) -> usize {
        self.gauge.peak()
    }

    /// 在限流器内执行一次远程调用
    ///
    /// 没有空闲槽位时阻塞等待（不设超时）
    pub async fn run<T, F>(&self, call: F) -> Result<T, DriveError>
    where
        F: Future<Output = Result<T, DriveError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| DriveError::LimiterClosed)?;

        let guard = self.gauge.enter();
        debug!(
            "API 调用进入限流器: in_flight={}/{}",
            guard.current(),
            self.ceiling
        );

        call.await
    }
}

impl Default for ApiLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_API_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limiter_respects_ceiling() {
        let limiter = ApiLimiter::new(2);
        let mut handles = Vec::new();

        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .run(async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, DriveError>(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(limiter.peak() <= 2);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_limiter_propagates_error() {
        let limiter = ApiLimiter::new(1);
        let result: Result<(), _> = limiter
            .run(async { Err(DriveError::NotFound("x".to_string())) })
            .await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_slot() {
        let limiter = ApiLimiter::new(1);
        let inner = limiter.clone();
        let handle = tokio::spawn(async move {
            inner
                .run(async {
                    std::future::pending::<()>().await;
                    Ok::<_, DriveError>(())
                })
                .await
        });

        while limiter.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(limiter.in_flight(), 0);

        // 槽位已归还
        limiter
            .run(async { Ok::<_, DriveError>(()) })
            .await
            .unwrap();
        assert_eq!(limiter.peak(), 1);
    }
}
