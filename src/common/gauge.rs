//! 并发计数
//!
//! 限流器和传输池共用：记录当前执行数和观测到的峰值。
//! 计数通过守卫递减，调用方的 future 被丢弃（任务中止、JoinSet 被释放）时同样生效。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 当前并发数 + 峰值，克隆共享同一组计数
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGauge {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入一次执行，守卫释放时退出
    pub fn enter(&self) -> GaugeGuard {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        GaugeGuard {
            in_flight: self.in_flight.clone(),
            current,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// 执行中的标记
#[derive(Debug)]
pub struct GaugeGuard {
    in_flight: Arc<AtomicUsize>,
    /// 进入时的并发数
    current: usize,
}

impl GaugeGuard {
    pub fn current(&self) -> usize {
        self.current
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
