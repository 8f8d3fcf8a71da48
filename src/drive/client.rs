// 云端存储客户端
//
// 对 DriveBackend 的类型化封装，每个操作都经过 API 调用限流器

use crate::common::DEFAULT_SPEED_WINDOW_MS;
use crate::drive::backend::DriveBackend;
use crate::drive::limiter::ApiLimiter;
use crate::drive::stream::{track_progress, ByteStream, ProgressFn};
use crate::drive::types::{CreatedObject, DriveError, FolderSpec, ObjectSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 单次生成 ID 的默认上限
pub const DEFAULT_MAX_IDS_PER_REQUEST: usize = 1000;

/// 云端存储客户端
#[derive(Clone)]
pub struct RemoteStoreClient {
    backend: Arc<dyn DriveBackend>,
    limiter: ApiLimiter,
    max_ids_per_request: usize,
    speed_window: Duration,
}

impl RemoteStoreClient {
    pub fn new(backend: Arc<dyn DriveBackend>, limiter: ApiLimiter) -> Self {
        Self {
            backend,
            limiter,
            max_ids_per_request: DEFAULT_MAX_IDS_PER_REQUEST,
            speed_window: Duration::from_millis(DEFAULT_SPEED_WINDOW_MS),
        }
    }

    pub fn with_max_ids_per_request(mut self, max: usize) -> Self {
        self.max_ids_per_request = max.max(1);
        self
    }

    pub fn with_speed_window(mut self, window: Duration) -> Self {
        self.speed_window = window;
        self
    }

    pub fn limiter(&self) -> &ApiLimiter {
        &self.limiter
    }

    pub fn max_ids_per_request(&self) -> usize {
        self.max_ids_per_request
    }

    /// 确保存储根下只有一个保留名称的根目录
    ///
    /// 不存在则创建；存在多个（并发创建导致）时保留远端列表中的第一个，删除其余
    pub async fn ensure_root_directory(&self, name: &str) -> Result<String, DriveError> {
        let existing = self
            .limiter
            .run(self.backend.list_by_name(name, None))
            .await?;

        let mut existing = existing.into_iter();
        let Some(first) = existing.next() else {
            let spec = FolderSpec {
                name: name.to_string(),
                ..Default::default()
            };
            let id = self.limiter.run(self.backend.create_folder(&spec)).await?;
            info!("创建根目录: name={}, id={}", name, id);
            return Ok(id);
        };

        for duplicate in existing {
            warn!(
                "发现重复的根目录，删除: name={}, id={}, 保留={}",
                name, duplicate.id, first.id
            );
            self.limiter
                .run(self.backend.delete_object(&duplicate.id))
                .await?;
        }

        debug!("使用已有根目录: name={}, id={}", name, first.id);
        Ok(first.id)
    }

    /// 创建文件夹（可指定 ID）
    pub async fn create_directory(
        &self,
        name: &str,
        id: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<String, DriveError> {
        let spec = FolderSpec {
            name: name.to_string(),
            id: id.map(str::to_string),
            parent_id: parent_id.map(str::to_string),
        };
        self.limiter.run(self.backend.create_folder(&spec)).await
    }

    /// 上传一个对象
    ///
    /// 获得限流器槽位后先调用 `on_start`，然后流式上传；远端返回非成功状态时为 `Ok(None)`
    pub async fn create_object<S>(
        &self,
        spec: ObjectSpec,
        body: ByteStream,
        on_start: S,
        on_progress: Option<ProgressFn>,
    ) -> Result<Option<CreatedObject>, DriveError>
    where
        S: FnOnce() + Send,
    {
        let size = spec.size;
        self.limiter
            .run(async {
                on_start();
                let body = match on_progress {
                    Some(callback) => track_progress(body, size, self.speed_window, callback),
                    None => body,
                };
                self.backend.create_object(&spec, body).await
            })
            .await
    }

    /// 打开对象的流式读取，进度按已读字节 / size 计算
    ///
    /// 限流器只在建立读取时占用
    pub async fn read_object<S>(
        &self,
        id: &str,
        size: u64,
        on_start: S,
        on_progress: Option<ProgressFn>,
    ) -> Result<ByteStream, DriveError>
    where
        S: FnOnce() + Send,
    {
        let stream = self
            .limiter
            .run(async {
                on_start();
                self.backend.read_object(id).await
            })
            .await?;

        Ok(match on_progress {
            Some(callback) => track_progress(stream, size, self.speed_window, callback),
            None => stream,
        })
    }

    /// 单次批量生成 ID，数量不超过单次上限
    pub async fn generate_ids(&self, count: usize) -> Result<Vec<String>, DriveError> {
        let count = count.min(self.max_ids_per_request);
        if count == 0 {
            return Ok(Vec::new());
        }
        self.limiter.run(self.backend.generate_ids(count)).await
    }

    /// 生成单个 ID
    pub async fn generate_id(&self) -> Result<Option<String>, DriveError> {
        Ok(self.generate_ids(1).await?.into_iter().next())
    }

    pub async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        self.limiter.run(self.backend.delete_object(id)).await
    }
}
