use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{IndexError, Result};

pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// 令牌剩余有效期低于该值时提前刷新
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// 服务账号 JSON 文件中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IndexError::Configuration(format!(
                "服务账号文件不存在: {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Configuration(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| IndexError::Configuration(format!("无效的服务账号文件: {}", e)))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: SystemTime,
}

/// 通过 JWT bearer 授权换取访问令牌，并缓存到过期前
pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    client: Client,
    scope: String,
    cached: Mutex<Option<AccessToken>>,
}

impl ServiceAccountAuth {
    pub fn new(key: ServiceAccountKey, client: Client, scope: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| IndexError::Configuration(format!("无效的服务账号私钥: {}", e)))?;
        Ok(Self { key, encoding_key, client, scope: scope.to_owned(), cached: Mutex::new(None) })
    }

    /// 返回缓存的令牌，即将过期时自动刷新
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > SystemTime::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }
        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// 强制刷新令牌
    pub async fn refresh(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn assertion(&self, now: u64) -> Result<String> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| IndexError::Fetch(format!("签名 JWT 失败: {}", e)))
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let now = SystemTime::now();
        let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let assertion = self.assertion(secs)?;
        debug!("请求访问令牌: {}", self.key.client_email);

        let resp = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::Fetch(format!("获取访问令牌失败: {}", e)))?;
        let body: TokenResponse =
            resp.json().await.map_err(|e| IndexError::Fetch(format!("无效的令牌响应: {}", e)))?;
        if body.access_token.is_empty() {
            return Err(IndexError::Fetch("令牌响应中没有 access_token".to_owned()));
        }

        Ok(AccessToken {
            value: body.access_token,
            expires_at: now + Duration::from_secs(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_fs::prelude::*;

    use super::*;
    use crate::source::mock::{self, MockGoogle};

    #[test]
    fn missing_key_file_is_configuration_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let err = ServiceAccountKey::from_file(&dir.path().join("serviceAcc.json")).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[test]
    fn key_file_defaults_token_uri() {
        let dir = assert_fs::TempDir::new().unwrap();
        let file = dir.child("sa.json");
        file.write_str(r#"{"client_email": "a@b.iam", "private_key": "---", "type": "service_account"}"#)
            .unwrap();
        let key = ServiceAccountKey::from_file(file.path()).unwrap();
        assert_eq!(key.client_email, "a@b.iam");
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn invalid_private_key_is_rejected() {
        let key = ServiceAccountKey {
            client_email: "a@b.iam".into(),
            private_key: "not a pem".into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
        };
        let err = ServiceAccountAuth::new(key, Client::new(), DRIVE_READONLY_SCOPE).err().unwrap();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[tokio::test]
    async fn token_is_cached_until_close_to_expiry() {
        let mock = Arc::new(MockGoogle::default());
        let base = mock::serve(mock.clone()).await;
        let auth = mock::auth(&base);

        assert_eq!(auth.token().await.unwrap(), "tok-1");
        assert_eq!(auth.token().await.unwrap(), "tok-1");
        assert_eq!(mock.token_requests(), 1);

        assert_eq!(auth.refresh().await.unwrap(), "tok-2");
        assert_eq!(auth.token().await.unwrap(), "tok-2");
        assert_eq!(mock.token_requests(), 2);
    }

    #[tokio::test]
    async fn token_expiring_within_margin_is_refreshed() {
        // 30 秒内过期的令牌不会被复用
        let mock = Arc::new(MockGoogle { expires_in: 30, ..Default::default() });
        let base = mock::serve(mock.clone()).await;
        let auth = mock::auth(&base);

        assert_eq!(auth.token().await.unwrap(), "tok-1");
        assert_eq!(auth.token().await.unwrap(), "tok-2");
        assert_eq!(mock.token_requests(), 2);
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_fetch_error() {
        let auth = mock::auth("http://127.0.0.1:9");
        assert!(matches!(auth.token().await, Err(IndexError::Fetch(_))));
    }
}
