use std::sync::{Arc, OnceLock};

use log::info;
use tokio::sync::Mutex;

use crate::error::{IndexError, Result};
use crate::store::{Distance, VectorStore};

/// 目标集合的状态，整个运行期间只会从 `Unresolved` 转换一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Unresolved,
    Created(usize),
}

/// 确保目标集合存在，并且维度与向量一致
pub struct CollectionResolver {
    store: Arc<dyn VectorStore>,
    name: String,
    dim: OnceLock<usize>,
    lock: Mutex<()>,
}

impl CollectionResolver {
    pub fn new(store: Arc<dyn VectorStore>, name: impl Into<String>) -> Self {
        Self { store, name: name.into(), dim: OnceLock::new(), lock: Mutex::new(()) }
    }

    #[cfg(test)]
    pub fn state(&self) -> CollectionState {
        match self.dim.get() {
            Some(&dim) => CollectionState::Created(dim),
            None => CollectionState::Unresolved,
        }
    }

    /// 确保集合以 `dim` 维存在
    ///
    /// 集合已确定后再传入不同的维度会返回 [`IndexError::DimensionMismatch`]，由调用方按单项失败处理。
    pub async fn ensure(&self, dim: usize) -> Result<()> {
        // 快速路径，不加锁
        if let Some(&created) = self.dim.get() {
            return check_dim(created, dim);
        }

        let _guard = self.lock.lock().await;
        if let Some(&created) = self.dim.get() {
            return check_dim(created, dim);
        }

        match self.store.get_collection(&self.name).await? {
            Some(existing) => {
                if existing.distance != Distance::Cosine {
                    return Err(IndexError::Write(format!(
                        "集合 {} 使用 {:?} 距离，人脸向量需要 Cosine",
                        self.name, existing.distance
                    )));
                }
                check_dim(existing.dim, dim)?;
                info!("使用已存在的集合 {} ({} 维)", self.name, existing.dim);
            }
            None => {
                info!("创建集合 {} ({} 维, Cosine)", self.name, dim);
                self.store.create_collection(&self.name, dim, Distance::Cosine).await?;
            }
        }

        // 只有持锁者会走到这里
        let _ = self.dim.set(dim);
        Ok(())
    }
}

fn check_dim(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(IndexError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
