use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use log::{error, info};
use prometheus::{BasicAuthentication, labels};
use tokio::task::spawn_blocking;

use crate::cli::SubCommandExtend;
use crate::config::{EngineOptions, Opts, PipelineOptions, StoreOptions};
use crate::engine::{EmbeddingEngine, EngineCell, OpenCvFaceEngine};
use crate::pipeline::PipelineBuilder;
use crate::source::{DriveSource, LocalSource, MediaSource};
use crate::utils::{DEFAULT_SUFFIX, suffix_regex};

#[derive(Parser, Debug, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["folder_id", "local_folder"])))]
pub struct IndexCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub engine: EngineOptions,
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    /// Google Drive 目录 ID
    #[arg(long, env = "DRIVE_FOLDER_ID", value_name = "ID")]
    pub folder_id: Option<String>,
    /// 本地图片目录，用于本地测试
    #[arg(long, value_name = "PATH")]
    pub local_folder: Option<PathBuf>,
    /// 服务账号 JSON 文件
    #[arg(long, env = "SERVICE_ACCOUNT_FILE", default_value = "serviceAcc.json")]
    pub service_account_file: PathBuf,
    #[arg(long, env = "OWNER_ID", default_value = "public")]
    pub owner_id: String,
    #[arg(long, env = "EVENT_NAME", default_value = "event")]
    pub event_name: String,
    /// 运行清单的输出目录
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub manifest_dir: PathBuf,
    /// 本地目录扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl IndexCommand {
    fn source(&self) -> Result<Arc<dyn MediaSource>> {
        if let Some(path) = &self.local_folder {
            let re_suf = suffix_regex(&self.suffix)?;
            return Ok(Arc::new(LocalSource::new(path.clone(), re_suf)));
        }
        let folder_id = self.folder_id.clone().unwrap_or_default();
        let source = DriveSource::from_service_account_file(&self.service_account_file, folder_id)?;
        Ok(Arc::new(source))
    }

    async fn push_metrics(&self, url: String) {
        let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.event_name.clone());
        let auth = self.prometheus_auth.clone().and_then(|s| {
            s.split_once(':').map(|(username, password)| BasicAuthentication {
                username: username.to_string(),
                password: password.to_string(),
            })
        });
        let metric_families = prometheus::gather();
        let r = spawn_blocking(move || {
            prometheus::push_metrics(
                "faceindex",
                labels! {
                    "instance".to_string() => instance,
                },
                &url,
                metric_families,
                auth,
            )
        })
        .await;
        match r {
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送指标失败: {e}"),
            Ok(Ok(())) => {}
        }
    }
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        // 向量库未配置时，在任何工作开始前失败
        let store = Arc::new(self.store.connect().await?);
        let source = self.source()?;

        let engine_opts = self.engine.clone();
        let engine = EngineCell::new(move || {
            let engine = OpenCvFaceEngine::load(&engine_opts)?;
            Ok(Arc::new(engine) as Arc<dyn EmbeddingEngine>)
        });

        let pipeline = PipelineBuilder::new(source, store, engine)
            .collection(self.store.collection.clone())
            .max_dim(self.pipeline.max_dim)
            .workers(self.pipeline.max_workers)
            .progress(!self.no_progress)
            .build();

        let manifest = pipeline.run(&self.owner_id, &self.event_name).await?;
        let path = manifest.write_to(&self.manifest_dir)?;
        info!("已写入运行清单: {}", path.display());

        if let Some(url) = self.prometheus_push.clone() {
            self.push_metrics(url).await;
        }

        Ok(())
    }
}
