use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CollectionInfo, Distance, VectorStore};
use crate::error::{IndexError, Result};
use crate::types::UpsertPoint;

struct Collection {
    info: CollectionInfo,
    points: BTreeMap<String, UpsertPoint>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    create_calls: usize,
    upsert_calls: usize,
}

/// 内存向量库，语义与 Qdrant 的 upsert 一致
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 集合中的所有点，按 ID 排序
    pub fn points(&self, name: &str) -> Vec<UpsertPoint> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .collections
            .get(name)
            .map(|c| c.points.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn create_calls(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).create_calls
    }

    #[cfg(test)]
    pub fn upsert_calls(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).upsert_calls
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.collections.get(name).map(|c| c.info.clone()))
    }

    async fn create_collection(&self, name: &str, dim: usize, distance: Distance) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.create_calls += 1;
        if inner.collections.contains_key(name) {
            return Err(IndexError::Write(format!("集合已存在: {}", name)));
        }
        let info = CollectionInfo { dim, distance };
        inner.collections.insert(name.to_owned(), Collection { info, points: BTreeMap::new() });
        Ok(())
    }

    async fn upsert(&self, name: &str, points: &[UpsertPoint]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.upsert_calls += 1;
        let collection = inner
            .collections
            .get_mut(name)
            .ok_or_else(|| IndexError::Write(format!("集合不存在: {}", name)))?;
        if let Some(p) = points.iter().find(|p| p.vector.len() != collection.info.dim) {
            return Err(IndexError::Write(format!(
                "向量维度错误: 期望 {}，实际 {} ({})",
                collection.info.dim,
                p.vector.len(),
                p.id
            )));
        }
        for p in points {
            collection.points.insert(p.id.clone(), p.clone());
        }
        Ok(())
    }
}
