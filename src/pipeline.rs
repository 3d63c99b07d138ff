//! 索引流水线
//!
//! 枚举来源中的全部图片，然后以固定并发数逐张执行 下载 → 解码 → 检测 → 建集合 → 写入。
//! 单张图片的错误在任务内部记录并计为 0 个点，不会影响其他图片。

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use tokio::task::spawn_blocking;

use crate::collection::CollectionResolver;
use crate::decode::DecoderRegistry;
use crate::engine::EngineCell;
use crate::error::{IndexError, Result};
use crate::manifest::RunManifest;
use crate::metrics::{self, Outcome};
use crate::source::MediaSource;
use crate::store::VectorStore;
use crate::types::MediaRef;
use crate::utils::pb_style;
use crate::writer::UpsertWriter;

/// 运行期间共享的资源，启动时创建一次并以引用传给所有任务
pub struct Pipeline {
    source: Arc<dyn MediaSource>,
    engine: EngineCell,
    decoders: Arc<DecoderRegistry>,
    resolver: CollectionResolver,
    writer: UpsertWriter,
    max_dim: i32,
    workers: usize,
    progress: bool,
}

pub struct PipelineBuilder {
    source: Arc<dyn MediaSource>,
    store: Arc<dyn VectorStore>,
    engine: EngineCell,
    collection: String,
    max_dim: i32,
    workers: usize,
    progress: bool,
}

impl PipelineBuilder {
    pub fn new(source: Arc<dyn MediaSource>, store: Arc<dyn VectorStore>, engine: EngineCell) -> Self {
        Self {
            source,
            store,
            engine,
            collection: "faces".to_owned(),
            max_dim: 800,
            workers: 4,
            progress: false,
        }
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = name.into();
        self
    }

    pub fn max_dim(mut self, max_dim: i32) -> Self {
        self.max_dim = max_dim;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            source: self.source,
            engine: self.engine,
            decoders: Arc::new(DecoderRegistry::default()),
            resolver: CollectionResolver::new(self.store.clone(), self.collection.clone()),
            writer: UpsertWriter::new(self.store, self.collection),
            max_dim: self.max_dim,
            workers: self.workers,
            progress: self.progress,
        }
    }
}

impl Pipeline {
    #[cfg(test)]
    pub fn resolver(&self) -> &CollectionResolver {
        &self.resolver
    }

    /// 执行一次完整的索引
    ///
    /// 只有初始化失败和枚举失败会返回错误，单张图片的错误都被吸收。
    pub async fn run(&self, owner_id: &str, event_id: &str) -> Result<RunManifest> {
        let started_at = Utc::now();
        let start = Instant::now();

        self.engine.get().await?;

        let items = self.source.enumerate().await?;
        info!("共找到 {} 张图片", items.len());

        let pb = if self.progress {
            ProgressBar::new(items.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };

        // 按完成顺序汇总
        let total = futures::stream::iter(items.iter())
            .map(|item| self.process_item(item, owner_id, event_id))
            .buffer_unordered(self.workers)
            .fold(0usize, |acc, n| {
                pb.inc(1);
                async move { acc + n }
            })
            .await;

        pb.finish_with_message("索引完成");
        let elapsed = start.elapsed();
        info!(
            "索引完成，写入 {} 个点，耗时 {:.2} 分钟",
            total,
            elapsed.as_secs_f64() / 60.
        );

        Ok(RunManifest {
            owner_id: owner_id.to_owned(),
            event_id: event_id.to_owned(),
            files_indexed: items.len(),
            points_upserted: total,
            started_at,
            timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64(),
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// 处理一张图片，任何错误都记录日志并返回 0
    async fn process_item(&self, item: &MediaRef, owner_id: &str, event_id: &str) -> usize {
        let start = Instant::now();
        let result = self.index_one(item, owner_id, event_id).await;
        let duration = start.elapsed().as_secs_f32();
        match result {
            Ok(0) => {
                debug!("未检测到人脸: {}", item.display_name);
                metrics::observe_item(Outcome::Empty, 0, duration);
                0
            }
            Ok(n) => {
                debug!("写入 {} 个点: {}", n, item.display_name);
                metrics::observe_item(Outcome::Ok, n, duration);
                n
            }
            Err(e) => {
                warn!("处理失败 {}: {}", item.display_name, e);
                metrics::observe_item(Outcome::Failed, 0, duration);
                0
            }
        }
    }

    async fn index_one(&self, item: &MediaRef, owner_id: &str, event_id: &str) -> Result<usize> {
        let bytes = self.source.fetch(item).await?;
        let engine = self.engine.get().await?;

        let decoders = self.decoders.clone();
        let max_dim = self.max_dim;
        let media = item.clone();
        let faces = spawn_blocking(move || match decoders.decode(&bytes, &media, max_dim) {
            Some(image) => engine.detect(&image),
            None => Ok(vec![]),
        })
        .await
        .map_err(|e| IndexError::Detection(format!("检测任务异常退出: {}", e)))??;

        let Some(first) = faces.first() else {
            return Ok(0);
        };
        let dim = first.embedding.len();
        self.resolver.ensure(dim).await?;
        self.writer.write(item, &faces, dim, owner_id, event_id).await
    }
}
