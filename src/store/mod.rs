mod memory;
mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::memory::*;
pub use self::qdrant::*;
use crate::error::Result;
use crate::types::UpsertPoint;

/// 向量距离度量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
}

/// 已存在集合的信息
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub dim: usize,
    pub distance: Distance,
}

/// 向量库
///
/// 连接建立后 `upsert` 必须可以被多个任务并发调用。
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 查询集合，不存在时返回 `None`
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    async fn create_collection(&self, name: &str, dim: usize, distance: Distance) -> Result<()>;

    /// 批量写入，相同 ID 的点会被覆盖；要么全部成功，要么返回错误
    async fn upsert(&self, name: &str, points: &[UpsertPoint]) -> Result<()>;
}
