//! 字节流与流级进度
//!
//! 上传请求体和下载响应体都以 `ByteStream` 表示，
//! `track_progress` 在数据流经时按字节回调进度。

use crate::common::SpeedSampler;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// 分片数据流
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// 流级进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProgress {
    /// 已传输字节数
    pub transferred: u64,
    /// 总字节数
    pub total: u64,
    /// 本次新增字节数
    pub delta: u64,
    /// 百分比（0-100）
    pub percentage: f64,
    /// 速度（字节/秒，按窗口采样）
    pub speed: u64,
}

/// 进度回调
pub type ProgressFn = Arc<dyn Fn(StreamProgress) + Send + Sync>;

/// 包装数据流，每流过一个数据块回调一次进度
pub fn track_progress(
    stream: ByteStream,
    total: u64,
    speed_window: Duration,
    on_progress: ProgressFn,
) -> ByteStream {
    let mut transferred = 0u64;
    let mut sampler = SpeedSampler::new(speed_window);

    Box::pin(stream.map(move |item| {
        if let Ok(data) = &item {
            let delta = data.len() as u64;
            transferred += delta;
            let speed = sampler.record(delta);
            let percentage = if total == 0 {
                100.0
            } else {
                (transferred as f64 / total as f64 * 100.0).min(100.0)
            };
            on_progress(StreamProgress {
                transferred,
                total,
                delta,
                percentage,
                speed,
            });
        }
        item
    }))
}

/// 由内存数据构建数据流（按 piece_size 切块）
pub fn stream_from_bytes(data: Bytes, piece_size: usize) -> ByteStream {
    let piece_size = piece_size.max(1);
    let mut pieces = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + piece_size).min(data.len());
        pieces.push(Ok(data.slice(offset..end)));
        offset = end;
    }
    Box::pin(futures::stream::iter(pieces))
}

/// 读取整个数据流到内存
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(item) = stream.next().await {
        buf.extend_from_slice(&item?);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_track_progress_reports_each_piece() {
        let data = Bytes::from(vec![7u8; 2500]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let stream = track_progress(
            stream_from_bytes(data, 1000),
            2500,
            Duration::from_secs(1),
            Arc::new(move |p| seen_clone.lock().push(p)),
        );
        let out = collect_stream(stream).await.unwrap();
        assert_eq!(out.len(), 2500);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].delta, 1000);
        assert_eq!(seen[2].transferred, 2500);
        assert_eq!(seen[2].delta, 500);
        assert_eq!(seen[2].percentage, 100.0);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let out = collect_stream(stream_from_bytes(Bytes::new(), 16)).await.unwrap();
        assert!(out.is_empty());
    }
}
