//! Qdrant REST 客户端

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{CollectionInfo, Distance, VectorStore};
use crate::error::{IndexError, Result};
use crate::types::UpsertPoint;

pub struct QdrantStore {
    client: Client,
    endpoint: String,
}

impl QdrantStore {
    /// 创建客户端并检查服务是否可达
    pub async fn connect(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let store = Self::new(url, api_key, timeout)?;
        store
            .client
            .get(format!("{}/collections", store.endpoint))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IndexError::Configuration(format!("无法连接 Qdrant {}: {}", url, e)))?;
        info!("已连接 Qdrant: {}", store.endpoint);
        Ok(store)
    }

    pub fn new(url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(IndexError::Configuration(format!("Qdrant 地址必须是 http(s) URL: {}", url)));
        }
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|_| IndexError::Configuration("无效的 Qdrant API key".to_owned()))?;
            headers.insert("api-key", value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IndexError::Configuration(format!("创建 Qdrant 客户端失败: {}", e)))?;
        Ok(Self { client, endpoint: url.trim_end_matches('/').to_owned() })
    }

    fn collection_url(&self, name: &str) -> String {
        format!("{}/collections/{}", self.endpoint, name)
    }
}

#[derive(Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: QdrantDistance,
}

#[derive(Serialize, Deserialize)]
enum QdrantDistance {
    Cosine,
    Euclid,
    Dot,
    Manhattan,
}

impl From<Distance> for QdrantDistance {
    fn from(d: Distance) -> Self {
        match d {
            Distance::Cosine => QdrantDistance::Cosine,
            Distance::Euclid => QdrantDistance::Euclid,
            Distance::Dot => QdrantDistance::Dot,
        }
    }
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct UpsertPoints<'a> {
    points: &'a [UpsertPoint],
}

#[derive(Deserialize)]
struct Response<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionResult {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

impl CollectionResult {
    fn into_info(self) -> Result<CollectionInfo> {
        let params = self.config.params.vectors;
        let distance = match params.distance {
            QdrantDistance::Cosine => Distance::Cosine,
            QdrantDistance::Euclid => Distance::Euclid,
            QdrantDistance::Dot => Distance::Dot,
            QdrantDistance::Manhattan => {
                return Err(IndexError::Write("不支持 Manhattan 距离的集合".to_owned()));
            }
        };
        Ok(CollectionInfo { dim: params.size, distance })
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_owned());
    Err(IndexError::Write(format!("Qdrant 请求失败 ({}): {}", status, body)))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let resp = self
            .client
            .get(self.collection_url(name))
            .send()
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Response<CollectionResult> =
            check(resp).await?.json().await.map_err(|e| IndexError::Write(e.to_string()))?;
        body.result.into_info().map(Some)
    }

    async fn create_collection(&self, name: &str, dim: usize, distance: Distance) -> Result<()> {
        let request = CreateCollection { vectors: VectorParams { size: dim, distance: distance.into() } };
        let resp = self
            .client
            .put(self.collection_url(name))
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;
        check(resp).await?;
        Ok(())
    }

    async fn upsert(&self, name: &str, points: &[UpsertPoint]) -> Result<()> {
        debug!("写入 {} 个点到 {}", points.len(), name);
        let resp = self
            .client
            .put(format!("{}/points", self.collection_url(name)))
            .query(&[("wait", "true")])
            .json(&UpsertPoints { points })
            .send()
            .await
            .map_err(|e| IndexError::Write(e.to_string()))?;
        check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::types::PointPayload;

    /// 只保存集合配置的 Qdrant 替身
    #[derive(Default)]
    struct FakeQdrant {
        collections: Mutex<HashMap<String, Value>>,
        api_keys: Mutex<Vec<String>>,
    }

    async fn list_collections(State(fake): State<Arc<FakeQdrant>>, headers: HeaderMap) -> Json<Value> {
        if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
            fake.api_keys.lock().unwrap().push(key.to_owned());
        }
        Json(json!({"result": {"collections": []}, "status": "ok"}))
    }

    async fn get_collection(
        State(fake): State<Arc<FakeQdrant>>,
        Path(name): Path<String>,
    ) -> axum::response::Response {
        match fake.collections.lock().unwrap().get(&name) {
            Some(vectors) => Json(json!({
                "result": {"status": "green", "config": {"params": {"vectors": vectors}}},
                "status": "ok"
            }))
            .into_response(),
            None => (
                axum::http::StatusCode::NOT_FOUND,
                Json(json!({"status": {"error": format!("Collection `{name}` doesn't exist!")}})),
            )
                .into_response(),
        }
    }

    async fn put_collection(
        State(fake): State<Arc<FakeQdrant>>,
        Path(name): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        fake.collections.lock().unwrap().insert(name, body["vectors"].clone());
        Json(json!({"result": true, "status": "ok"}))
    }

    async fn serve(fake: Arc<FakeQdrant>) -> String {
        let app = Router::new()
            .route("/collections", get(list_collections))
            .route("/collections/{name}", get(get_collection).put(put_collection))
            .with_state(fake);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn missing_collection_is_none() {
        let fake = Arc::new(FakeQdrant::default());
        let url = serve(fake.clone()).await;
        let store = QdrantStore::connect(&url, Some("secret"), Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.get_collection("faces").await.unwrap(), None);
        assert_eq!(*fake.api_keys.lock().unwrap(), vec!["secret".to_owned()]);
    }

    #[tokio::test]
    async fn created_collection_is_reported() {
        let fake = Arc::new(FakeQdrant::default());
        let url = serve(fake.clone()).await;
        let store = QdrantStore::connect(&url, None, Duration::from_secs(5)).await.unwrap();

        store.create_collection("faces", 128, Distance::Cosine).await.unwrap();
        let info = store.get_collection("faces").await.unwrap();
        assert_eq!(info, Some(CollectionInfo { dim: 128, distance: Distance::Cosine }));
    }

    #[tokio::test]
    async fn unreachable_store_fails_to_connect() {
        let err = QdrantStore::connect("http://127.0.0.1:9", None, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn parse_collection_info() {
        let body: Response<CollectionResult> = serde_json::from_str(
            r#"{
                "result": {
                    "status": "green",
                    "config": {"params": {"vectors": {"size": 128, "distance": "Cosine"}}}
                },
                "status": "ok",
                "time": 0.001
            }"#,
        )
        .unwrap();
        let info = body.result.into_info().unwrap();
        assert_eq!(info, CollectionInfo { dim: 128, distance: Distance::Cosine });
    }

    #[test]
    fn create_request_body() {
        let request =
            CreateCollection { vectors: VectorParams { size: 512, distance: Distance::Cosine.into() } };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, serde_json::json!({"vectors": {"size": 512, "distance": "Cosine"}}));
    }

    #[test]
    fn upsert_request_body() {
        let points = [UpsertPoint {
            id: "5f1e9c3e-0000-5000-8000-000000000000".into(),
            vector: vec![0.5, 0.5],
            payload: PointPayload {
                owner_id: "o".into(),
                event_id: "e".into(),
                file_id: "f".into(),
                file_name: "a.jpg".into(),
                link: "l".into(),
                bbox: None,
            },
        }];
        let value = serde_json::to_value(UpsertPoints { points: &points }).unwrap();
        assert_eq!(value["points"][0]["vector"], serde_json::json!([0.5, 0.5]));
        assert_eq!(value["points"][0]["payload"]["file_name"], "a.jpg");
        assert!(value["points"][0]["payload"]["bbox"].is_null());
    }

    #[test]
    fn reject_non_http_url() {
        let err = QdrantStore::new("localhost:6333", None, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, IndexError::Configuration(_)));
        assert!(QdrantStore::new("http://localhost:6333/", Some("key"), Duration::from_secs(1)).is_ok());
    }
}
