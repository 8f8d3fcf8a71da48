// 云端存储 API 数据类型

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 文件夹 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// 默认对象 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 云端存储错误
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API 错误: status={status}, body={body}")]
    Api { status: u16, body: String },

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("解析响应失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("API 调用限流器已关闭")]
    LimiterClosed,
}

/// 云端对象（文件或文件夹）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl RemoteObject {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

/// 创建文件夹参数
#[derive(Debug, Clone, Default)]
pub struct FolderSpec {
    pub name: String,
    /// 调用方指定的 ID（让文件的分组目录与文件逻辑 ID 相同）
    pub id: Option<String>,
    pub parent_id: Option<String>,
}

/// 创建对象参数（数据流单独传递）
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub name: String,
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub size: u64,
    pub mime_type: String,
}

impl ObjectSpec {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            id: None,
            parent_id: None,
            size,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// 创建成功后返回的对象信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedObject {
    pub remote_id: String,
    pub name: String,
}

/// 文件列表响应
#[derive(Debug, Clone, Deserialize)]
pub struct FileListResponse {
    #[serde(default)]
    pub files: Vec<RemoteObject>,
}

/// 批量生成 ID 响应
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateIdsResponse {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// 创建对象/文件夹响应
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

/// OAuth 刷新令牌响应
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_list() {
        let json = r#"{"files":[{"id":"a1","name":"Courses","mimeType":"application/vnd.google-apps.folder"}]}"#;
        let list: FileListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(list.files.len(), 1);
        assert!(list.files[0].is_folder());
    }

    #[test]
    fn test_parse_generate_ids_without_field() {
        let resp: GenerateIdsResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.ids.is_empty());
    }
}
