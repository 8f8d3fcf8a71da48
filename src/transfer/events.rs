//! 传输事件
//!
//! 上传/下载过程只通过 `TransferObserver` 对外报告状态：
//! - 分片规划进度与规划完成
//! - 分片生命周期（开始/结束/失败）
//! - 分片字节级进度与文件级进度
//!
//! 回调在发出事件的任务内同步执行，实现方不应阻塞。

use crate::transfer::types::{Chunk, TaskState, TransferDirection};
use serde::Serialize;
use tokio::sync::mpsc;

/// 分片生命周期事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkEventKind {
    StartUploading,
    EndUploading,
    ErrorUploading,
    StartDownloading,
    EndDownloading,
    ErrorDownloading,
}

impl ChunkEventKind {
    pub fn start(direction: TransferDirection) -> Self {
        match direction {
            TransferDirection::Upload => Self::StartUploading,
            TransferDirection::Download => Self::StartDownloading,
        }
    }

    pub fn end(direction: TransferDirection) -> Self {
        match direction {
            TransferDirection::Upload => Self::EndUploading,
            TransferDirection::Download => Self::EndDownloading,
        }
    }

    pub fn error(direction: TransferDirection) -> Self {
        match direction {
            TransferDirection::Upload => Self::ErrorUploading,
            TransferDirection::Download => Self::ErrorDownloading,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorUploading | Self::ErrorDownloading)
    }

    /// 事件发出后分片所处的状态
    pub fn state(&self) -> TaskState {
        match self {
            Self::StartUploading | Self::StartDownloading => TaskState::InFlight,
            Self::EndUploading | Self::EndDownloading => TaskState::Done,
            Self::ErrorUploading | Self::ErrorDownloading => TaskState::Failed,
        }
    }
}

/// 分片生命周期事件
#[derive(Debug, Clone, Serialize)]
pub struct ChunkEvent {
    pub kind: ChunkEventKind,
    pub state: TaskState,
    pub chunk_index: usize,
    pub chunk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkEvent {
    pub fn new(kind: ChunkEventKind, chunk: &Chunk) -> Self {
        Self {
            kind,
            state: kind.state(),
            chunk_index: chunk.index,
            chunk_id: chunk.id.clone(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 分片规划进度
#[derive(Debug, Clone, Serialize)]
pub struct ChunkingProgress {
    pub index: usize,
    pub total_chunks: usize,
}

/// 分片规划结果
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunks: Vec<Chunk>,
}

/// 分片字节级进度
#[derive(Debug, Clone, Serialize)]
pub struct ChunkProgress {
    pub direction: TransferDirection,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub transferred: u64,
    pub total: u64,
    pub delta: u64,
    /// 分片自身的百分比
    pub percentage: f64,
    pub speed: u64,
}

/// 文件级进度
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FileProgress {
    pub direction: TransferDirection,
    pub transferred: u64,
    pub total: u64,
    /// round(transferred / total * 100)
    pub percentage: u32,
    /// 字节/秒，按固定窗口采样
    pub speed: u64,
}

/// 传输观察者
///
/// 所有方法都有空实现，按需覆盖
pub trait TransferObserver: Send + Sync {
    fn on_chunking_progress(&self, _progress: &ChunkingProgress) {}

    fn on_chunking_complete(&self, _plan: &ChunkPlan) {}

    fn on_chunk_event(&self, _event: &ChunkEvent) {}

    fn on_chunk_progress(&self, _progress: &ChunkProgress) {}

    fn on_file_progress(&self, _progress: &FileProgress) {}
}

/// 不做任何处理的观察者
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// 统一的事件枚举（用于通过通道转发）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TransferEvent {
    ChunkingProgress(ChunkingProgress),
    ChunkingComplete {
        total_size: u64,
        total_chunks: usize,
    },
    Chunk(ChunkEvent),
    ChunkProgress(ChunkProgress),
    FileProgress(FileProgress),
}

/// 把事件转发到 mpsc 通道的观察者
///
/// 接收端关闭后事件被丢弃
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: TransferEvent) {
        let _ = self.sender.send(event);
    }
}

impl TransferObserver for ChannelObserver {
    fn on_chunking_progress(&self, progress: &ChunkingProgress) {
        self.send(TransferEvent::ChunkingProgress(progress.clone()));
    }

    fn on_chunking_complete(&self, plan: &ChunkPlan) {
        self.send(TransferEvent::ChunkingComplete {
            total_size: plan.total_size,
            total_chunks: plan.chunks.len(),
        });
    }

    fn on_chunk_event(&self, event: &ChunkEvent) {
        self.send(TransferEvent::Chunk(event.clone()));
    }

    fn on_chunk_progress(&self, progress: &ChunkProgress) {
        self.send(TransferEvent::ChunkProgress(progress.clone()));
    }

    fn on_file_progress(&self, progress: &FileProgress) {
        self.send(TransferEvent::FileProgress(*progress));
    }
}
