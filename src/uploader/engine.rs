// 分片上传引擎
//
// 规划分片 → 预分配 ID → 通过传输池并发上传 → 返回每个分片的结果
//
// 单个分片失败只记录在结果中，不影响其他分片

use crate::common::DEFAULT_SPEED_WINDOW_MS;
use crate::drive::{ByteStream, ObjectSpec, ProgressFn, RemoteStoreClient};
use crate::transfer::{
    Chunk, ChunkEvent, ChunkEventKind, ChunkOutcome, ChunkProgress, ProgressAggregator,
    TransferDirection, TransferError, TransferObserver, TransferPool,
};
use crate::uploader::chunk::{ChunkPlanner, DEFAULT_CHUNK_STREAM_SIZE, DEFAULT_MAX_CHUNK_SIZE};
use crate::uploader::id_allocator::IdAllocator;
use rand::seq::SliceRandom;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 上传参数
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// 最大分片大小
    pub max_chunk_size: u64,
    /// 分片读取缓冲大小
    pub chunk_stream_size: usize,
    /// 是否打乱上传顺序（避免远端负载集中在前几个分片）
    pub shuffle: bool,
    /// 速度采样窗口
    pub speed_window: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            chunk_stream_size: DEFAULT_CHUNK_STREAM_SIZE,
            shuffle: true,
            speed_window: Duration::from_millis(DEFAULT_SPEED_WINDOW_MS),
        }
    }
}

/// 文件上传结果
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub total_size: u64,
    /// 按 index 排序的分片结果
    pub outcomes: Vec<ChunkOutcome>,
}

impl UploadResult {
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.outcomes.iter().filter(|o| o.error)
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| !o.error)
    }
}

/// 分片上传引擎
#[derive(Clone)]
pub struct UploadEngine {
    client: RemoteStoreClient,
    allocator: IdAllocator,
    pool: TransferPool,
    settings: UploadSettings,
}

impl UploadEngine {
    pub fn new(client: RemoteStoreClient, pool: TransferPool, settings: UploadSettings) -> Self {
        Self {
            allocator: IdAllocator::new(client.clone()),
            client,
            pool,
            settings,
        }
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// 上传本地文件的全部分片到 parent_id 目录下
    pub async fn upload_file(
        &self,
        source: &Path,
        parent_id: Option<&str>,
        observer: Arc<dyn TransferObserver>,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, TransferError> {
        let total_size = tokio::fs::metadata(source).await?.len();

        // 1. 规划分片（分配失败时整体中止，不会开始任何传输）
        let planner = ChunkPlanner::new(&self.allocator, self.settings.max_chunk_size);
        let mut chunks = planner.plan(total_size, observer.as_ref(), cancel).await?;
        let total_chunks = chunks.len();

        if self.settings.shuffle {
            chunks.shuffle(&mut rand::thread_rng());
        }

        // 2. 构建分片任务
        let aggregator = Arc::new(ProgressAggregator::new(
            TransferDirection::Upload,
            total_size,
            self.settings.speed_window,
        ));
        let source: PathBuf = source.to_path_buf();
        let parent_id = parent_id.map(str::to_string);

        let tasks: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let job = ChunkUpload {
                    client: self.client.clone(),
                    source: source.clone(),
                    parent_id: parent_id.clone(),
                    stream_size: self.settings.chunk_stream_size,
                    observer: observer.clone(),
                    aggregator: aggregator.clone(),
                    total_chunks,
                };
                job.run(chunk)
            })
            .collect();

        // 3. 并发上传
        info!(
            "开始上传: {:?}, 分片数量={}, 并发上限={}",
            source,
            total_chunks,
            self.pool.ceiling()
        );
        let mut outcomes = self.pool.run_all(tasks, cancel).await?;
        outcomes.sort_by_key(|o| o.chunk.index);

        let failed = outcomes.iter().filter(|o| o.error).count();
        if failed > 0 {
            warn!("上传结束: {} 个分片失败 / 共 {}", failed, total_chunks);
        } else {
            info!("上传完成: {:?}, 共 {} 个分片", source, total_chunks);
        }

        Ok(UploadResult {
            total_size,
            outcomes,
        })
    }
}

/// 打开源文件中某个字节范围的读取流
async fn open_range_stream(
    path: &Path,
    range: &Range<u64>,
    buffer_size: usize,
) -> std::io::Result<ByteStream> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let reader = file.take(range.end - range.start);
    Ok(Box::pin(ReaderStream::with_capacity(reader, buffer_size.max(1))))
}

/// 单个分片的上传任务
struct ChunkUpload {
    client: RemoteStoreClient,
    source: PathBuf,
    parent_id: Option<String>,
    stream_size: usize,
    observer: Arc<dyn TransferObserver>,
    aggregator: Arc<ProgressAggregator>,
    total_chunks: usize,
}

impl ChunkUpload {
    async fn run(self, chunk: Chunk) -> ChunkOutcome {
        let direction = TransferDirection::Upload;

        let body = match open_range_stream(&self.source, &chunk.range, self.stream_size).await {
            Ok(body) => body,
            Err(e) => {
                return self.fail(chunk, format!("读取分片数据失败: {}", e));
            }
        };

        // 对象名与 ID 都使用分片 ID
        let spec = ObjectSpec::new(chunk.id.clone(), chunk.size())
            .with_id(chunk.id.clone())
            .with_parent(self.parent_id.clone());

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
            let event = ChunkEvent::new(ChunkEventKind::start(direction), &chunk);
            move || observer.on_chunk_event(&event)
        };

        match self
            .client
            .create_object(spec, body, on_start, Some(on_progress))
            .await
        {
            Ok(Some(created)) => {
                debug!("分片 #{} 上传成功: remote_id={}", chunk.index, created.remote_id);
                self.observer
                    .on_chunk_event(&ChunkEvent::new(ChunkEventKind::end(direction), &chunk));
                ChunkOutcome::succeeded(chunk, Some(created.remote_id))
            }
            Ok(None) => self.fail(chunk, "远端返回非成功状态"),
            Err(e) => self.fail(chunk, e.to_string()),
        }
    }

    fn fail(&self, chunk: Chunk, reason: impl Into<String>) -> ChunkOutcome {
        let reason = reason.into();
        warn!("分片 #{} ({}) 上传失败: {}", chunk.index, chunk.id, reason);
        self.observer.on_chunk_event(
            &ChunkEvent::new(ChunkEventKind::error(TransferDirection::Upload), &chunk)
                .with_error(reason.clone()),
        );
        ChunkOutcome::failed(chunk, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{ApiLimiter, MemoryBackend};
    use crate::transfer::{ChannelObserver, TransferEvent};
    use std::io::Write;

    fn engine_for(backend: Arc<MemoryBackend>, max_chunk_size: u64, pool: TransferPool) -> UploadEngine {
        let client = RemoteStoreClient::new(backend, ApiLimiter::new(3));
        UploadEngine::new(
            client,
            pool,
            UploadSettings {
                max_chunk_size,
                chunk_stream_size: 128,
                ..Default::default()
            },
        )
    }

    fn source_file(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[tokio::test]
    async fn test_upload_stores_every_chunk() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_for(backend.clone(), 1000, TransferPool::new(3));
        let (file, data) = source_file(2500);

        let result = engine
            .upload_file(
                file.path(),
                None,
                Arc::new(crate::transfer::NoopObserver),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.is_complete());
        assert_eq!(result.outcomes.len(), 3);
        for outcome in &result.outcomes {
            let remote_id = outcome.remote_id.as_ref().unwrap();
            let stored = backend.object_data(remote_id).unwrap();
            let range = outcome.chunk.range.clone();
            assert_eq!(stored, data[range.start as usize..range.end as usize]);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let backend = Arc::new(MemoryBackend::new());
        // 新建的内存后端按顺序生成 ID，第 3 个分片（index 2）的 ID 是 mem00000003
        backend.reject_uploads_named("mem00000003");
        let engine = engine_for(backend.clone(), 1000, TransferPool::new(2));
        let (file, _) = source_file(5000);
        let (observer, mut rx) = ChannelObserver::new();

        let result = engine
            .upload_file(file.path(), None, Arc::new(observer), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcomes.len(), 5);
        assert!(!result.is_complete());
        for outcome in &result.outcomes {
            if outcome.chunk.index == 2 {
                assert!(outcome.error);
                assert!(outcome.remote_id.is_none());
            } else {
                assert!(!outcome.error);
                assert!(outcome.remote_id.is_some());
            }
        }

        let mut errored = Vec::new();
        let mut last_file_percentage = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                TransferEvent::Chunk(e) if e.kind == ChunkEventKind::ErrorUploading => {
                    errored.push(e.chunk_index)
                }
                TransferEvent::FileProgress(p) => last_file_percentage = p.percentage,
                _ => {}
            }
        }
        assert_eq!(errored, vec![2]);
        // 失败分片的数据同样流经进度统计
        assert_eq!(last_file_percentage, 100);
    }

    #[tokio::test]
    async fn test_upload_respects_both_ceilings() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_upload_delay(Duration::from_millis(10));
        let pool = TransferPool::new(2);
        let engine = engine_for(backend, 100, pool.clone());
        let (file, _) = source_file(2500);

        let result = engine
            .upload_file(
                file.path(),
                None,
                Arc::new(crate::transfer::NoopObserver),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.outcomes.len(), 25);
        assert!(pool.peak() <= 2);
        assert!(engine.client.limiter().peak() <= 3);
    }

    #[tokio::test]
    async fn test_allocation_failure_aborts_before_transfer() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_next_generate_calls(2);
        let engine = engine_for(backend.clone(), 1000, TransferPool::new(2));
        let (file, _) = source_file(2500);

        let result = engine
            .upload_file(
                file.path(),
                None,
                Arc::new(crate::transfer::NoopObserver),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(TransferError::Allocation(_))));
        assert_eq!(backend.generate_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatching_chunks() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_upload_delay(Duration::from_millis(100));
        let engine = engine_for(backend.clone(), 100, TransferPool::new(1));
        let (file, _) = source_file(500);
        let (observer, mut rx) = ChannelObserver::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = engine
            .upload_file(file.path(), None, Arc::new(observer), &cancel)
            .await;
        assert!(matches!(result, Err(TransferError::Cancelled)));

        // 只有取消前已获得槽位的分片开始过
        let mut started = 0;
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::Chunk(e) = event {
                if e.kind == ChunkEventKind::StartUploading {
                    started += 1;
                }
            }
        }
        assert!(started <= 1);
        assert_eq!(engine.pool.in_flight(), 0);
    }
}
