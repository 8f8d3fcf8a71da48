// 文件级进度聚合
//
// 把各分片的字节增量累加为文件进度，速度按固定窗口采样

use crate::common::SpeedSampler;
use crate::transfer::events::FileProgress;
use crate::transfer::types::TransferDirection;
use parking_lot::Mutex;
use std::time::Duration;

/// 文件百分比：round(transferred / total * 100)，空文件视为 100
pub fn file_percentage(transferred: u64, total: u64) -> u32 {
    if total == 0 {
        return 100;
    }
    ((transferred as f64 / total as f64) * 100.0).round().min(100.0) as u32
}

#[derive(Debug)]
struct AggregatorState {
    transferred: u64,
    sampler: SpeedSampler,
}

/// 单个文件传输的进度聚合器
#[derive(Debug)]
pub struct ProgressAggregator {
    direction: TransferDirection,
    total: u64,
    state: Mutex<AggregatorState>,
}

impl ProgressAggregator {
    pub fn new(direction: TransferDirection, total: u64, speed_window: Duration) -> Self {
        Self {
            direction,
            total,
            state: Mutex::new(AggregatorState {
                transferred: 0,
                sampler: SpeedSampler::new(speed_window),
            }),
        }
    }

    /// 累加一个分片的字节增量，返回最新的文件进度
    pub fn record(&self, delta: u64) -> FileProgress {
        let mut state = self.state.lock();
        state.transferred += delta;
        let speed = state.sampler.record(delta);
        FileProgress {
            direction: self.direction,
            transferred: state.transferred,
            total: self.total,
            percentage: file_percentage(state.transferred, self.total),
            speed,
        }
    }

    pub fn transferred(&self) -> u64 {
        self.state.lock().transferred
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
