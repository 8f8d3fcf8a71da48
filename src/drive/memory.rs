//! 内存对象存储后端
//!
//! 进程内实现 `DriveBackend`，支持注入故障和延迟：
//! - 限制单次生成 ID 的数量（模拟远端返回不足）
//! - 指定名称的上传返回非成功状态
//! - 指定对象的读取延迟或失败

use crate::drive::backend::DriveBackend;
use crate::drive::stream::{collect_stream, stream_from_bytes, ByteStream};
use crate::drive::types::{
    CreatedObject, DriveError, FolderSpec, ObjectSpec, RemoteObject, FOLDER_MIME_TYPE,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 读取时每块的大小
const READ_PIECE_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct MemoryObject {
    name: String,
    parent_id: Option<String>,
    mime_type: String,
    data: Bytes,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<String, MemoryObject>,
    /// 创建顺序（列表结果按此排序）
    order: Vec<String>,
    next_id: u64,
    id_batch_limit: Option<usize>,
    failing_generate_calls: usize,
    rejected_names: HashSet<String>,
    failing_reads: HashSet<String>,
    read_delays: HashMap<String, Duration>,
    upload_delay: Option<Duration>,
}

impl MemoryState {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem{:08}", self.next_id)
    }

    fn insert(&mut self, id: String, object: MemoryObject) -> Result<(), DriveError> {
        if self.objects.contains_key(&id) {
            return Err(DriveError::Api {
                status: 409,
                body: format!("对象已存在: {}", id),
            });
        }
        self.order.push(id.clone());
        self.objects.insert(id, object);
        Ok(())
    }
}

/// 内存后端
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    generate_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单次生成 ID 最多返回 limit 个
    pub fn with_id_batch_limit(self, limit: usize) -> Self {
        self.state.lock().id_batch_limit = Some(limit);
        self
    }

    /// 接下来 calls 次生成 ID 调用返回错误
    pub fn fail_next_generate_calls(&self, calls: usize) {
        self.state.lock().failing_generate_calls = calls;
    }

    /// 指定名称的对象上传时返回非成功状态
    pub fn reject_uploads_named(&self, name: impl Into<String>) {
        self.state.lock().rejected_names.insert(name.into());
    }

    /// 每次上传在读取数据前等待
    pub fn set_upload_delay(&self, delay: Duration) {
        self.state.lock().upload_delay = Some(delay);
    }

    /// 读取指定对象时失败
    pub fn fail_reads_of(&self, id: impl Into<String>) {
        self.state.lock().failing_reads.insert(id.into());
    }

    /// 读取指定对象前等待
    pub fn set_read_delay(&self, id: impl Into<String>, delay: Duration) {
        self.state.lock().read_delays.insert(id.into(), delay);
    }

    /// 直接放入一个文件夹（用于准备测试数据）
    pub fn seed_folder(&self, name: &str, parent_id: Option<&str>) -> String {
        let mut state = self.state.lock();
        let id = state.fresh_id();
        state.order.push(id.clone());
        state.objects.insert(
            id.clone(),
            MemoryObject {
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                data: Bytes::new(),
            },
        );
        id
    }

    /// 直接放入一个数据对象
    pub fn seed_object(&self, id: &str, data: Vec<u8>) {
        let mut state = self.state.lock();
        state.order.push(id.to_string());
        state.objects.insert(
            id.to_string(),
            MemoryObject {
                name: id.to_string(),
                parent_id: None,
                mime_type: crate::drive::types::DEFAULT_MIME_TYPE.to_string(),
                data: Bytes::from(data),
            },
        );
    }

    pub fn object_data(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(id).map(|o| o.data.to_vec())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().objects.contains_key(id)
    }

    /// 某个父目录下的对象 ID（按创建顺序）
    pub fn children_of(&self, parent_id: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter(|id| {
                state
                    .objects
                    .get(*id)
                    .map(|o| o.parent_id.as_deref() == Some(parent_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriveBackend for MemoryBackend {
    async fn list_by_name(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<RemoteObject>, DriveError> {
        let state = self.state.lock();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.objects.get(id).map(|o| (id, o)))
            .filter(|(_, o)| o.name == name && o.parent_id.as_deref() == parent_id)
            .map(|(id, o)| RemoteObject {
                id: id.clone(),
                name: o.name.clone(),
                mime_type: Some(o.mime_type.clone()),
            })
            .collect())
    }

    async fn create_folder(&self, spec: &FolderSpec) -> Result<String, DriveError> {
        let mut state = self.state.lock();
        let id = match &spec.id {
            Some(id) => id.clone(),
            None => state.fresh_id(),
        };
        state.insert(
            id.clone(),
            MemoryObject {
                name: spec.name.clone(),
                parent_id: spec.parent_id.clone(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                data: Bytes::new(),
            },
        )?;
        Ok(id)
    }

    async fn create_object(
        &self,
        spec: &ObjectSpec,
        body: ByteStream,
    ) -> Result<Option<CreatedObject>, DriveError> {
        let (rejected, delay) = {
            let state = self.state.lock();
            (state.rejected_names.contains(&spec.name), state.upload_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let data = collect_stream(body).await?;
        if rejected {
            return Ok(None);
        }

        let mut state = self.state.lock();
        let id = match &spec.id {
            Some(id) => id.clone(),
            None => state.fresh_id(),
        };
        state.insert(
            id.clone(),
            MemoryObject {
                name: spec.name.clone(),
                parent_id: spec.parent_id.clone(),
                mime_type: spec.mime_type.clone(),
                data: Bytes::from(data),
            },
        )?;

        Ok(Some(CreatedObject {
            remote_id: id,
            name: spec.name.clone(),
        }))
    }

    async fn read_object(&self, id: &str) -> Result<ByteStream, DriveError> {
        let (delay, failing, data) = {
            let state = self.state.lock();
            (
                state.read_delays.get(id).copied(),
                state.failing_reads.contains(id),
                state.objects.get(id).map(|o| o.data.clone()),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(DriveError::Api {
                status: 500,
                body: format!("读取失败: {}", id),
            });
        }
        let data = data.ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        Ok(stream_from_bytes(data, READ_PIECE_SIZE))
    }

    async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.objects.remove(id).is_none() {
            return Err(DriveError::NotFound(id.to_string()));
        }
        state.order.retain(|o| o != id);
        Ok(())
    }

    async fn generate_ids(&self, count: usize) -> Result<Vec<String>, DriveError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.failing_generate_calls > 0 {
            state.failing_generate_calls -= 1;
            return Err(DriveError::Api {
                status: 503,
                body: "generateIds 暂不可用".to_string(),
            });
        }
        let count = state.id_batch_limit.map_or(count, |limit| count.min(limit));
        Ok((0..count).map(|_| state.fresh_id()).collect())
    }
}
