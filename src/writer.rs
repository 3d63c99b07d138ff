use std::sync::Arc;

use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::store::VectorStore;
use crate::types::{FaceRecord, MediaRef, PointPayload, UpsertPoint};

/// 由来源 ID 和人脸序号生成稳定的点 ID
///
/// 使用固定的 URL 命名空间，重复运行会得到相同的 ID。
pub fn point_id(source_id: &str, source_index: usize) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}_{}", source_id, source_index).as_bytes())
}

/// 为一张图片的所有人脸构建写入点
pub fn build_points(
    item: &MediaRef,
    faces: &[FaceRecord],
    owner_id: &str,
    event_id: &str,
) -> Vec<UpsertPoint> {
    faces
        .iter()
        .map(|face| UpsertPoint {
            id: point_id(&item.source_id, face.source_index).to_string(),
            vector: face.embedding.clone(),
            payload: PointPayload {
                owner_id: owner_id.to_owned(),
                event_id: event_id.to_owned(),
                file_id: item.source_id.clone(),
                file_name: item.display_name.clone(),
                link: item.access_link.clone(),
                bbox: face.bbox,
            },
        })
        .collect()
}

/// 将人脸批量写入目标集合
pub struct UpsertWriter {
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self { store, collection: collection.into() }
    }

    /// 一次批量写入，返回写入的点数
    ///
    /// 所有向量必须是 `dim` 维。
    pub async fn write(
        &self,
        item: &MediaRef,
        faces: &[FaceRecord],
        dim: usize,
        owner_id: &str,
        event_id: &str,
    ) -> Result<usize> {
        if faces.is_empty() {
            return Ok(0);
        }
        if let Some(face) = faces.iter().find(|f| f.embedding.len() != dim) {
            return Err(IndexError::DimensionMismatch { expected: dim, actual: face.embedding.len() });
        }
        let points = build_points(item, faces, owner_id, event_id);
        self.store.upsert(&self.collection, &points).await?;
        Ok(points.len())
    }
}
