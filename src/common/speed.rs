//! 窗口采样速度计算
//!
//! 按固定的时间窗口（默认 1 秒）累积字节数，每个窗口结束时报告一次速度并清零，
//! 用于平滑单个分片的抖动，而不是计算瞬时速度。

use std::time::{Duration, Instant};

/// 默认采样窗口（毫秒）
pub const DEFAULT_SPEED_WINDOW_MS: u64 = 1000;

/// 窗口速度采样器
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    /// 采样窗口
    window: Duration,
    /// 当前窗口起点
    window_start: Instant,
    /// 当前窗口内累积的字节数
    bytes_in_window: u64,
    /// 上一个窗口报告的速度（字节/秒）
    last_speed: u64,
}

impl SpeedSampler {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// 指定起始时间创建（测试中用于驱动确定性时钟）
    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            window_start: start,
            bytes_in_window: 0,
            last_speed: 0,
        }
    }

    /// 记录新传输的字节数，返回当前报告的速度
    pub fn record(&mut self, delta: u64) -> u64 {
        self.record_at(delta, Instant::now())
    }

    /// 在给定时间点记录字节数
    ///
    /// 窗口未结束时返回上一个窗口的速度；窗口结束时按实际经过的时间计算新速度并重置
    pub fn record_at(&mut self, delta: u64, now: Instant) -> u64 {
        self.bytes_in_window += delta;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            let secs = elapsed.as_secs_f64();
            self.last_speed = (self.bytes_in_window as f64 / secs) as u64;
            self.bytes_in_window = 0;
            self.window_start = now;
        }

        self.last_speed
    }

    /// 上一个窗口的速度
    pub fn speed(&self) -> u64 {
        self.last_speed
    }
}

impl Default for SpeedSampler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_SPEED_WINDOW_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_reported_after_window() {
        let start = Instant::now();
        let mut sampler = SpeedSampler::starting_at(Duration::from_secs(1), start);

        // 窗口内不报告新速度
        assert_eq!(sampler.record_at(400, start + Duration::from_millis(200)), 0);
        assert_eq!(sampler.record_at(600, start + Duration::from_millis(700)), 0);

        // 窗口结束：1000 字节 / 1 秒
        assert_eq!(sampler.record_at(0, start + Duration::from_secs(1)), 1000);
        assert_eq!(sampler.speed(), 1000);
    }

    #[test]
    fn test_window_resets_after_tick() {
        let start = Instant::now();
        let mut sampler = SpeedSampler::starting_at(Duration::from_secs(1), start);

        sampler.record_at(2000, start + Duration::from_secs(1));
        assert_eq!(sampler.speed(), 2000);

        // 下一个窗口内保持上次速度
        assert_eq!(sampler.record_at(100, start + Duration::from_millis(1500)), 2000);

        // 第二个窗口只统计新字节
        assert_eq!(sampler.record_at(400, start + Duration::from_secs(2)), 500);
    }
}
