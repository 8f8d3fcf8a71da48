//! 进度日志节流器
//!
//! 进度回调按字节块触发，频率远高于日志/界面需要的刷新率。
//! 节流器保证两次输出之间至少间隔指定时间（建议 200-250ms）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 从未输出过的标记
const NEVER: u64 = u64::MAX;

/// 进度节流器
///
/// 使用原子操作，可在多个并发分片任务间共享
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 时间基准点
    origin: Instant,
    /// 上次输出距基准点的纳秒数
    last_emit_nanos: AtomicU64,
    /// 节流间隔（纳秒）
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_emit_nanos: AtomicU64::new(NEVER),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 检查是否应该输出
    ///
    /// 第一次调用总是返回 true；之后距上次输出超过间隔才返回 true。
    /// 并发调用时通过 CAS 保证同一时刻只有一个调用者胜出
    pub fn should_emit(&self) -> bool {
        let now = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if last != NEVER && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制输出（用于完成时的最后一次更新）
    pub fn force_emit(&self) -> bool {
        let now = self.origin.elapsed().as_nanos() as u64;
        self.last_emit_nanos.store(now, Ordering::Relaxed);
        true
    }

    pub fn reset(&self) {
        self.last_emit_nanos.store(NEVER, Ordering::Relaxed);
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttler_basic() {
        let throttler = ProgressThrottler::with_millis(100);

        // 第一次应该输出
        assert!(throttler.should_emit());

        // 立即再次调用，不应该输出
        assert!(!throttler.should_emit());
    }

    #[test]
    fn test_throttler_after_interval() {
        let throttler = ProgressThrottler::with_millis(50);

        assert!(throttler.should_emit());
        thread::sleep(Duration::from_millis(60));
        assert!(throttler.should_emit());
    }

    #[test]
    fn test_reset() {
        let throttler = ProgressThrottler::with_millis(1000);

        throttler.should_emit();
        assert!(!throttler.should_emit());

        throttler.reset();
        assert!(throttler.should_emit());
        assert!(throttler.force_emit());
    }
}
