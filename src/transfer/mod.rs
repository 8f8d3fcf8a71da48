// 分片传输模块
//
// 上传与下载共用的分片描述、事件、进度聚合与传输池

pub mod events;
pub mod pool;
pub mod progress;
pub mod types;

pub use events::{
    ChannelObserver, ChunkEvent, ChunkEventKind, ChunkPlan, ChunkProgress, ChunkingProgress,
    FileProgress, NoopObserver, TransferEvent, TransferObserver,
};
pub use pool::{PoolError, TransferPool, DEFAULT_CONCURRENT_TRANSFERS};
pub use progress::{file_percentage, ProgressAggregator};
pub use types::{Chunk, ChunkOutcome, TaskState, TransferDirection, TransferError};
