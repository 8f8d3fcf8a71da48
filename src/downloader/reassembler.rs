//! 分片下载与合并
//!
//! 1. 每个分片下载到私有临时目录中的独立文件（通过传输池并发）
//! 2. 全部分片完成后，按 index 升序逐个写入目标流（一次只有一个分片在写）
//! 3. 临时目录在任何退出路径上都会被删除
//!
//! 任一分片失败时不会开始合并，避免输出中出现空洞。

use crate::catalog::ManifestChunk;
use crate::drive::{ProgressFn, RemoteStoreClient};
use crate::transfer::{
    Chunk, ChunkEvent, ChunkEventKind, ChunkOutcome, ChunkProgress, ProgressAggregator,
    TransferDirection, TransferError, TransferObserver, TransferPool,
};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 下载参数
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// 临时文件所在目录（为空时使用系统临时目录）
    pub temp_dir: Option<PathBuf>,
    pub speed_window: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            speed_window: Duration::from_millis(crate::common::DEFAULT_SPEED_WINDOW_MS),
        }
    }
}

/// 下载用的分片：描述 + 远端 ID
#[derive(Debug, Clone)]
struct DownloadChunk {
    chunk: Chunk,
    remote_id: String,
}

/// 把清单分片转换为带字节范围的分片，检查 index 连续、每个分片都有远端 ID
fn prepare_chunks(manifest_chunks: &[ManifestChunk]) -> Result<Vec<DownloadChunk>, TransferError> {
    let mut sorted: Vec<&ManifestChunk> = manifest_chunks.iter().collect();
    sorted.sort_by_key(|c| c.index);

    let mut offset = 0u64;
    let mut chunks = Vec::with_capacity(sorted.len());
    for (position, mc) in sorted.into_iter().enumerate() {
        if mc.index != position {
            return Err(TransferError::MissingChunk { index: position });
        }
        let remote_id = mc
            .remote_id
            .clone()
            .ok_or(TransferError::MissingChunk { index: mc.index })?;
        chunks.push(DownloadChunk {
            chunk: Chunk::new(mc.index, mc.id.clone(), offset..offset + mc.size),
            remote_id,
        });
        offset += mc.size;
    }
    Ok(chunks)
}

/// 分片下载合并器
#[derive(Clone)]
pub struct Reassembler {
    client: RemoteStoreClient,
    pool: TransferPool,
    settings: DownloadSettings,
}

impl Reassembler {
    pub fn new(client: RemoteStoreClient, pool: TransferPool, settings: DownloadSettings) -> Self {
        Self {
            client,
            pool,
            settings,
        }
    }

    fn create_temp_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("chunkdrive-");
        match &self.settings.temp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    /// 下载全部分片并按顺序写入 dest，返回写入的字节数
    pub async fn download<W>(
        &self,
        manifest_chunks: &[ManifestChunk],
        dest: &mut W,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let chunks = prepare_chunks(manifest_chunks)?;
        let total_size: u64 = chunks.iter().map(|c| c.chunk.size()).sum();
        let total_chunks = chunks.len();

        let temp = self.create_temp_dir()?;
        debug!("创建临时目录: {:?}", temp.path());

        // 1. 并发下载到临时文件
        let aggregator = Arc::new(ProgressAggregator::new(
            TransferDirection::Download,
            total_size,
            self.settings.speed_window,
        ));

        let tasks: Vec<_> = chunks
            .iter()
            .cloned()
            .map(|chunk| {
                let job = ChunkDownload {
                    client: self.client.clone(),
                    path: part_path(temp.path(), chunk.chunk.index),
                    observer: observer.clone(),
                    aggregator: aggregator.clone(),
                    total_chunks,
                };
                job.run(chunk)
            })
            .collect();

        info!(
            "开始下载: 分片数量={}, 总大小={} bytes, 并发上限={}",
            total_chunks,
            total_size,
            self.pool.ceiling()
        );
        let outcomes = self.pool.run_all(tasks, cancel).await?;

        if let Some(failed) = outcomes.iter().find(|o| o.error) {
            return Err(TransferError::ChunkFailed {
                index: failed.chunk.index,
                id: failed.chunk.id.clone(),
                reason: failed.reason.clone().unwrap_or_default(),
            });
        }

        // 2. 按 index 升序逐个合并
        let mut written = 0u64;
        for chunk in &chunks {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let path = part_path(temp.path(), chunk.chunk.index);
            let mut part = File::open(&path).await.map_err(|e| {
                TransferError::Reassembly(format!("打开分片 #{} 失败: {}", chunk.chunk.index, e))
            })?;
            let copied = tokio::io::copy(&mut part, &mut *dest).await.map_err(|e| {
                TransferError::Reassembly(format!("写入分片 #{} 失败: {}", chunk.chunk.index, e))
            })?;
            written += copied;
        }
        dest.flush().await?;

        if let Err(e) = temp.close() {
            warn!("删除临时目录失败: {}", e);
        }

        info!("合并完成: {} bytes", written);
        Ok(written)
    }
}

fn part_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{:08}.part", index))
}

/// 单个分片的下载任务
struct ChunkDownload {
    client: RemoteStoreClient,
    path: PathBuf,
    observer: Arc<dyn TransferObserver>,
    aggregator: Arc<ProgressAggregator>,
    total_chunks: usize,
}

impl ChunkDownload {
    async fn run(self, target: DownloadChunk) -> ChunkOutcome {
        let DownloadChunk { chunk, remote_id } = target;
        match self.fetch(&chunk, &remote_id).await {
            Ok(()) => {
                self.observer.on_chunk_event(&ChunkEvent::new(
                    ChunkEventKind::end(TransferDirection::Download),
                    &chunk,
                ));
                ChunkOutcome::succeeded(chunk, Some(remote_id))
            }
            Err(e) => {
                let reason = e.to_string();
                warn!("分片 #{} ({}) 下载失败: {}", chunk.index, chunk.id, reason);
                self.observer.on_chunk_event(
                    &ChunkEvent::new(ChunkEventKind::error(TransferDirection::Download), &chunk)
                        .with_error(reason.clone()),
                );
                ChunkOutcome::failed(chunk, reason)
            }
        }
    }

    async fn fetch(&self, chunk: &Chunk, remote_id: &str) -> Result<(), TransferError> {
        let direction = TransferDirection::Download;
        let size = chunk.size();

        let on_progress: ProgressFn = {
            let observer = self.observer.clone();
            let aggregator = self.aggregator.clone();
            let chunk_index = chunk.index;
            let total_chunks = self.total_chunks;
            Arc::new(move |p| {
                observer.on_chunk_progress(&ChunkProgress {
                    direction,
                    chunk_index,
                    total_chunks,
                    transferred: p.transferred,
                    total: p.total,
                    delta: p.delta,
                    percentage: p.percentage,
                    speed: p.speed,
                });
                observer.on_file_progress(&aggregator.record(p.delta));
            })
        };

        let on_start = {
            let observer = self.observer.clone();
            let event = ChunkEvent::new(ChunkEventKind::start(direction), chunk);
            move || observer.on_chunk_event(&event)
        };

        let mut stream = self
            .client
            .read_object(remote_id, size, on_start, Some(on_progress))
            .await?;

        let mut file = BufWriter::new(File::create(&self.path).await?);
        let mut received = 0u64;
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            received += piece.len() as u64;
            file.write_all(&piece).await?;
        }
        file.flush().await?;

        if received != size {
            return Err(TransferError::Reassembly(format!(
                "分片 #{} 大小不符: 期望 {} bytes, 实际 {} bytes",
                chunk.index, size, received
            )));
        }

        debug!("分片 #{} 下载完成: {} bytes", chunk.index, received);
        Ok(())
    }
}
