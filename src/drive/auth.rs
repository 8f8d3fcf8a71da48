// 访问令牌管理
//
// 使用外部提供的 refresh token 换取 access token，并缓存到过期前一分钟

use crate::drive::types::{DriveError, TokenResponse};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 提前刷新的余量
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth 客户端凭据
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// 访问令牌管理器
#[derive(Debug)]
pub struct TokenManager {
    credentials: OAuthCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// 获取有效的 access token（必要时刷新）
    pub async fn access_token(&self, client: &Client) -> Result<String, DriveError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
            debug!("access token 即将过期，重新刷新");
        }

        if self.credentials.refresh_token.is_empty() {
            return Err(DriveError::Auth("未配置 refresh token".to_string()));
        }

        let response = client
            .post(&self.credentials.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DriveError::Auth(format!(
                "刷新 access token 失败: status={}, body={}",
                status, body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        info!("access token 刷新成功，有效期 {} 秒", token.expires_in);

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(access_token)
    }

    /// 丢弃缓存的令牌（收到 401 时调用）
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
