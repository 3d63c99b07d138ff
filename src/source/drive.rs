use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::{info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    Child, DRIVE_READONLY_SCOPE, FolderListing, MediaSource, Page, ServiceAccountAuth,
    ServiceAccountKey, walk_tree,
};
use crate::error::{IndexError, Result};
use crate::types::MediaRef;

/// Drive v3 接口根地址
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "500";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, webViewLink)";
const ACCESS_FIELDS: &str = "nextPageToken, files(id, name, owners(emailAddress), shared, \
                             permissions(id, role, type, emailAddress, domain))";

/// 一页文件列表
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList<T> {
    #[serde(default = "Vec::new")]
    files: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    web_view_link: String,
}

/// 文件的所有者与共享权限
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccess {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub email_address: Option<String>,
    pub domain: Option<String>,
}

impl Permission {
    /// 被授权的对象：邮箱、域名或权限 ID
    pub fn grantee(&self) -> &str {
        self.email_address
            .as_deref()
            .or(self.domain.as_deref())
            .or(self.id.as_deref())
            .unwrap_or("-")
    }
}

impl From<DriveFile> for Child {
    fn from(file: DriveFile) -> Self {
        if file.mime_type == FOLDER_MIME {
            Child::Folder(file.id)
        } else if file.mime_type.starts_with("image/") {
            // 没有文件名时格式由 MIME 类型决定
            let display_name = if file.name.is_empty() { file.id.clone() } else { file.name };
            Child::Item(MediaRef {
                source_id: file.id,
                display_name,
                mime_type: file.mime_type,
                access_link: file.web_view_link,
            })
        } else {
            Child::Other
        }
    }
}

/// Google Drive 目录来源
pub struct DriveSource {
    client: Client,
    auth: ServiceAccountAuth,
    api_base: String,
    folder_id: String,
}

impl DriveSource {
    pub fn new(
        client: Client,
        auth: ServiceAccountAuth,
        api_base: impl Into<String>,
        folder_id: String,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_owned();
        Self { client, auth, api_base, folder_id }
    }

    /// 使用服务账号文件创建来源
    pub fn from_service_account_file(path: &Path, folder_id: String) -> Result<Self> {
        let key = ServiceAccountKey::from_file(path)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| IndexError::Configuration(format!("创建 HTTP 客户端失败: {}", e)))?;
        let auth = ServiceAccountAuth::new(key, client.clone(), DRIVE_READONLY_SCOPE)?;
        info!("已初始化 Google Drive 客户端");
        Ok(Self::new(client, auth, DRIVE_API_BASE, folder_id))
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }

    fn media_url(&self, item: &MediaRef) -> String {
        format!("{}/files/{}?alt=media", self.api_base, item.source_id)
    }

    /// 列出目录下一页的直接子条目
    async fn list_page<T: DeserializeOwned>(
        &self,
        folder: &str,
        fields: &str,
        page_token: Option<&str>,
    ) -> Result<FileList<T>> {
        let token = self.auth.token().await.map_err(|e| IndexError::Enumeration(e.to_string()))?;
        let query = format!("'{}' in parents and trashed=false", folder);
        let mut params = vec![("q", query.as_str()), ("fields", fields), ("pageSize", PAGE_SIZE)];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }

        self.client
            .get(self.files_url())
            .bearer_auth(token)
            .query(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::Enumeration(format!("{}: {}", folder, e)))?
            .json()
            .await
            .map_err(|e| IndexError::Enumeration(format!("{}: {}", folder, e)))
    }

    /// 列出根目录下所有文件的所有者和共享权限，不递归
    pub async fn list_access(&self) -> Result<Vec<FileAccess>> {
        let mut files = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let page: FileList<FileAccess> =
                self.list_page(&self.folder_id, ACCESS_FIELDS, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    /// 使用缓存令牌分块下载
    async fn fetch_streaming(&self, item: &MediaRef) -> Result<Vec<u8>> {
        let token = self.auth.token().await?;
        let resp = self
            .client
            .get(self.media_url(item))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::Fetch(e.to_string()))?;

        let mut data = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| IndexError::Fetch(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// 刷新令牌后直接请求完整内容
    async fn fetch_direct(&self, item: &MediaRef) -> Result<Vec<u8>> {
        let token = self.auth.refresh().await?;
        let resp = self
            .client
            .get(self.media_url(item))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::Fetch(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| IndexError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FolderListing for DriveSource {
    async fn list_children(&self, folder: &str, page_token: Option<&str>) -> Result<Page> {
        let list: FileList<DriveFile> = self.list_page(folder, LIST_FIELDS, page_token).await?;
        Ok(Page {
            children: list.files.into_iter().map(Child::from).collect(),
            next_page_token: list.next_page_token,
        })
    }
}

#[async_trait]
impl MediaSource for DriveSource {
    async fn enumerate(&self) -> Result<Vec<MediaRef>> {
        info!("开始枚举 Drive 目录: {}", self.folder_id);
        let items = walk_tree(self, &self.folder_id).await?;
        info!("枚举完成，共 {} 张图片", items.len());
        Ok(items)
    }

    async fn fetch(&self, item: &MediaRef) -> Result<Vec<u8>> {
        match self.fetch_streaming(item).await {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!("分块下载失败 {}: {}，改用刷新令牌后直接下载", item.display_name, e);
                self.fetch_direct(item).await.map_err(|e2| {
                    IndexError::Fetch(format!("{}: 直接下载同样失败: {}", item.display_name, e2))
                })
            }
        }
    }
}
