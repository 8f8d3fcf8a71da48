// Google Drive v3 REST 后端

use crate::drive::auth::{OAuthCredentials, TokenManager};
use crate::drive::backend::DriveBackend;
use crate::drive::stream::ByteStream;
use crate::drive::types::{
    CreateResponse, CreatedObject, DriveError, FileListResponse, FolderSpec, GenerateIdsResponse,
    ObjectSpec, RemoteObject, FOLDER_MIME_TYPE,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Body, Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 默认 API 地址
pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

/// 默认上传地址
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// 默认 OAuth 令牌地址
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google Drive 后端配置
#[derive(Debug, Clone)]
pub struct GoogleDriveOptions {
    pub api_base_url: String,
    pub upload_base_url: String,
    pub credentials: OAuthCredentials,
    pub request_timeout: Duration,
}

/// Google Drive 后端
#[derive(Debug)]
pub struct GoogleDriveBackend {
    /// HTTP客户端
    client: Client,
    /// 普通请求使用带超时的客户端，分片上传下载不设整体超时
    api_client: Client,
    tokens: TokenManager,
    api_base_url: String,
    upload_base_url: String,
}

impl GoogleDriveBackend {
    pub fn new(options: GoogleDriveOptions) -> Result<Self, DriveError> {
        info!("初始化 Google Drive 客户端: api={}", options.api_base_url);

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let api_client = Client::builder()
            .timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_client,
            tokens: TokenManager::new(options.credentials),
            api_base_url: options.api_base_url.trim_end_matches('/').to_string(),
            upload_base_url: options.upload_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn bearer(&self) -> Result<String, DriveError> {
        let token = self.tokens.access_token(&self.api_client).await?;
        Ok(format!("Bearer {}", token))
    }

    /// 检查响应状态，非成功时读取响应体作为错误信息
    async fn ensure_success(&self, response: Response) -> Result<Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(DriveError::NotFound(body));
        }
        Err(DriveError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// 转义查询语句中的字符串字面量
fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl DriveBackend for GoogleDriveBackend {
    async fn list_by_name(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<RemoteObject>, DriveError> {
        let query = format!(
            "'{}' in parents and name='{}' and trashed=false",
            escape_query_literal(parent_id.unwrap_or("root")),
            escape_query_literal(name)
        );
        debug!("列出对象: q={}", query);

        let response = self
            .api_client
            .get(format!("{}/files", self.api_base_url))
            .header("Authorization", self.bearer().await?)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,mimeType)"),
            ])
            .send()
            .await?;

        let list: FileListResponse = self.ensure_success(response).await?.json().await?;
        Ok(list.files)
    }

    async fn create_folder(&self, spec: &FolderSpec) -> Result<String, DriveError> {
        let parents: Vec<&str> = spec.parent_id.as_deref().into_iter().collect();
        let mut metadata = json!({
            "name": spec.name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": parents,
        });
        if let Some(id) = &spec.id {
            metadata["id"] = json!(id);
        }

        let response = self
            .api_client
            .post(format!("{}/files", self.api_base_url))
            .header("Authorization", self.bearer().await?)
            .json(&metadata)
            .send()
            .await?;

        let created: CreateResponse = self.ensure_success(response).await?.json().await?;
        info!("创建文件夹成功: name={}, id={}", spec.name, created.id);
        Ok(created.id)
    }

    async fn create_object(
        &self,
        spec: &ObjectSpec,
        body: ByteStream,
    ) -> Result<Option<CreatedObject>, DriveError> {
        let parents: Vec<&str> = spec.parent_id.as_deref().into_iter().collect();
        let mut metadata = json!({
            "name": spec.name,
            "mimeType": spec.mime_type,
            "parents": parents,
        });
        if let Some(id) = &spec.id {
            metadata["id"] = json!(id);
        }

        // 1. 发起可续传上传会话，获取上传地址
        let session = self
            .api_client
            .post(format!("{}/files", self.upload_base_url))
            .query(&[("uploadType", "resumable")])
            .header("Authorization", self.bearer().await?)
            .header("X-Upload-Content-Type", &spec.mime_type)
            .header("X-Upload-Content-Length", spec.size.to_string())
            .json(&metadata)
            .send()
            .await?;

        let status = session.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            warn!("创建上传会话失败: name={}, status={}", spec.name, status);
            return Ok(None);
        }

        let location = match session
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
        {
            Some(location) => location.to_string(),
            None => {
                warn!("上传会话响应缺少 Location: name={}", spec.name);
                return Ok(None);
            }
        };

        // 2. 流式上传数据
        let response = self
            .client
            .put(&location)
            .header("Content-Length", spec.size.to_string())
            .header("Content-Type", &spec.mime_type)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "上传对象失败: name={}, status={}, body={}",
                spec.name, status, body
            );
            return Ok(None);
        }

        let created: CreateResponse = response.json().await?;
        debug!(
            "上传对象成功: name={}, id={}, kind={}",
            spec.name, created.id, created.kind
        );

        Ok(Some(CreatedObject {
            remote_id: created.id,
            name: if created.name.is_empty() {
                spec.name.clone()
            } else {
                created.name
            },
        }))
    }

    async fn read_object(&self, id: &str) -> Result<ByteStream, DriveError> {
        let response = self
            .client
            .get(format!("{}/files/{}", self.api_base_url, id))
            .query(&[("alt", "media")])
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;

        let response = self.ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

        Ok(Box::pin(stream))
    }

    async fn delete_object(&self, id: &str) -> Result<(), DriveError> {
        let response = self
            .api_client
            .delete(format!("{}/files/{}", self.api_base_url, id))
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;

        self.ensure_success(response).await?;
        info!("删除对象成功: id={}", id);
        Ok(())
    }

    async fn generate_ids(&self, count: usize) -> Result<Vec<String>, DriveError> {
        let response = self
            .api_client
            .get(format!("{}/files/generateIds", self.api_base_url))
            .header("Authorization", self.bearer().await?)
            .query(&[("count", count.to_string().as_str()), ("space", "drive")])
            .send()
            .await?;

        let ids: GenerateIdsResponse = self.ensure_success(response).await?.json().await?;
        debug!("生成 ID: 请求={}, 返回={}", count, ids.ids.len());
        Ok(ids.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::stream::stream_from_bytes;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type Route = (&'static str, u16, &'static str);

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
    }

    /// 本地 HTTP 桩：按路径返回固定响应，记录请求路径
    async fn spawn_stub(routes: Vec<Route>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let log = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut tmp = [0u8; 4096];
                    let header_end = loop {
                        let n = socket.read(&mut tmp).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&tmp[..n]);
                        if let Some(end) = find_header_end(&buf) {
                            break end;
                        }
                    };

                    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                    let content_length = head
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while buf.len() < header_end + content_length {
                        let n = socket.read(&mut tmp).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&tmp[..n]);
                    }

                    let path = head
                        .split_whitespace()
                        .nth(1)
                        .and_then(|target| target.split('?').next())
                        .unwrap_or_default()
                        .to_string();
                    log.lock().push(path.clone());

                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, "{}"));
                    let response = format!(
                        "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn backend_for(base: &str) -> GoogleDriveBackend {
        GoogleDriveBackend::new(GoogleDriveOptions {
            api_base_url: base.to_string(),
            upload_base_url: format!("{}/upload", base),
            credentials: OAuthCredentials {
                token_url: format!("{}/token", base),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: "refresh".to_string(),
            },
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_escape_query_literal() {
        assert_eq!(escape_query_literal("Courses"), "Courses");
        assert_eq!(escape_query_literal("it's"), "it\\'s");
        assert_eq!(escape_query_literal("a\\b"), "a\\\\b");
    }

    #[tokio::test]
    async fn test_unauthorized_upload_session_refreshes_token() {
        let (base, hits) = spawn_stub(vec![
            ("/token", 200, r#"{"access_token":"t1","expires_in":3600}"#),
            ("/upload/files", 401, r#"{"error":"invalid_credentials"}"#),
        ])
        .await;
        let backend = backend_for(&base);

        for name in ["c0", "c1"] {
            let created = backend
                .create_object(
                    &ObjectSpec::new(name, 3),
                    stream_from_bytes(Bytes::from_static(b"abc"), 1),
                )
                .await
                .unwrap();
            assert!(created.is_none());
        }

        // 每次 401 之后都重新换取令牌
        let token_requests = hits.lock().iter().filter(|p| *p == "/token").count();
        assert_eq!(token_requests, 2);
    }

    #[tokio::test]
    async fn test_generate_ids_reuses_cached_token() {
        let (base, hits) = spawn_stub(vec![
            ("/token", 200, r#"{"access_token":"t1","expires_in":3600}"#),
            ("/files/generateIds", 200, r#"{"ids":["a","b"]}"#),
        ])
        .await;
        let backend = backend_for(&base);

        assert_eq!(backend.generate_ids(2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(backend.generate_ids(2).await.unwrap(), vec!["a", "b"]);

        let token_requests = hits.lock().iter().filter(|p| *p == "/token").count();
        assert_eq!(token_requests, 1);
    }
}
