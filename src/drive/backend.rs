// 云端存储后端抽象
//
// 只描述单次远程调用，不负责限流；限流与组合逻辑在 RemoteStoreClient 中完成

use crate::drive::stream::ByteStream;
use crate::drive::types::{CreatedObject, DriveError, FolderSpec, ObjectSpec, RemoteObject};
use async_trait::async_trait;

/// 云端对象存储后端
#[async_trait]
pub trait DriveBackend: Send + Sync {
    /// 列出父目录下指定名称的对象（parent 为 None 表示存储根目录）
    ///
    /// 返回顺序以远端为准
    async fn list_by_name(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<RemoteObject>, DriveError>;

    /// 创建文件夹，返回文件夹 ID
    async fn create_folder(&self, spec: &FolderSpec) -> Result<String, DriveError>;

    /// 上传对象
    ///
    /// 远端返回非成功状态时返回 `Ok(None)`（软失败），传输层错误返回 `Err`
    async fn create_object(
        &self,
        spec: &ObjectSpec,
        body: ByteStream,
    ) -> Result<Option<CreatedObject>, DriveError>;

    /// 打开对象的流式读取
    async fn read_object(&self, id: &str) -> Result<ByteStream, DriveError>;

    /// 删除对象
    async fn delete_object(&self, id: &str) -> Result<(), DriveError>;

    /// 批量生成 ID（单次调用，可能少于请求数量）
    async fn generate_ids(&self, count: usize) -> Result<Vec<String>, DriveError>;
}
