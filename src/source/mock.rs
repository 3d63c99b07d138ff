//! 本地模拟的 Google 令牌与 Drive 接口

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use super::{DRIVE_READONLY_SCOPE, DriveSource, ServiceAccountAuth, ServiceAccountKey};

pub const TEST_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");

const PAGE_SIZE: usize = 2;

pub struct MockGoogle {
    /// 签发令牌的有效期，单位为秒
    pub expires_in: u64,
    pub fail_first_media: bool,
    pub fail_all_media: bool,
    /// 目录 ID 到其子条目的映射
    pub folders: HashMap<String, Vec<Value>>,
    pub token_requests: AtomicUsize,
    pub media_requests: AtomicUsize,
}

impl Default for MockGoogle {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            fail_first_media: false,
            fail_all_media: false,
            folders: HashMap::new(),
            token_requests: AtomicUsize::new(0),
            media_requests: AtomicUsize::new(0),
        }
    }
}

impl MockGoogle {
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn media_requests(&self) -> usize {
        self.media_requests.load(Ordering::SeqCst)
    }

    fn current_token(&self) -> String {
        format!("tok-{}", self.token_requests())
    }
}

async fn token_handler(
    State(mock): State<Arc<MockGoogle>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let valid = form.get("grant_type").map(String::as_str)
        == Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
        && form.get("assertion").is_some_and(|a| a.split('.').count() == 3);
    if !valid {
        return (StatusCode::BAD_REQUEST, "invalid_grant").into_response();
    }
    let n = mock.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "access_token": format!("tok-{n}"), "expires_in": mock.expires_in }))
        .into_response()
}

async fn media_handler(
    State(mock): State<Arc<MockGoogle>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let n = mock.media_requests.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {}", mock.current_token());
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if mock.fail_all_media || (mock.fail_first_media && n == 0) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response();
    }
    format!("bytes-of-{id}").into_response()
}

async fn list_handler(
    State(mock): State<Arc<MockGoogle>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    // q = "'<folder>' in parents and trashed=false"
    let folder = query.get("q").and_then(|q| q.split('\'').nth(1)).unwrap_or_default();
    let Some(children) = mock.folders.get(folder) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let start = query.get("pageToken").and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
    let end = (start + PAGE_SIZE).min(children.len());
    let mut body = json!({ "files": children[start..end].to_vec() });
    if end < children.len() {
        body["nextPageToken"] = json!(end.to_string());
    }
    Json(body).into_response()
}

/// 启动模拟服务，返回其根地址
pub async fn serve(mock: Arc<MockGoogle>) -> String {
    let app = Router::new()
        .route("/token", post(token_handler))
        .route("/files", get(list_handler))
        .route("/files/{id}", get(media_handler))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

pub fn auth(base: &str) -> ServiceAccountAuth {
    let key = ServiceAccountKey {
        client_email: "indexer@test.iam.gserviceaccount.com".into(),
        private_key: TEST_PRIVATE_KEY.into(),
        token_uri: format!("{base}/token"),
    };
    ServiceAccountAuth::new(key, Client::new(), DRIVE_READONLY_SCOPE).unwrap()
}

pub fn drive(base: &str, folder_id: &str) -> DriveSource {
    DriveSource::new(Client::new(), auth(base), base, folder_id.to_owned())
}
