//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod gauge;
mod hash;
mod speed;
mod throttle;

pub use gauge::{ConcurrencyGauge, GaugeGuard};
pub use hash::sha256_file;
pub use speed::{SpeedSampler, DEFAULT_SPEED_WINDOW_MS};
pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};
