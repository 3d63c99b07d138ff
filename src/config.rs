use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::error::{IndexError, Result};
use crate::store::QdrantStore;

static MODEL_DIR: LazyLock<String> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "faceindex", "faceindex").expect("failed to get project dir");
    proj_dirs.data_dir().join("models").to_string_lossy().to_string()
});

fn default_model_dir() -> &'static str {
    MODEL_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "faceindex", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 索引一个来源中的所有人脸，并写出运行清单
    Index(IndexCommand),
    /// 启动 HTTP 任务服务
    Server(ServerCommand),
    /// 检查 Drive 目录中文件的所有者和共享权限
    CheckPerms(CheckPermsCommand),
}

/// 向量库配置
#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// Qdrant 地址，必填
    #[arg(long, env = "QDRANT_URL", value_name = "URL")]
    pub qdrant_url: Option<String>,
    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    pub qdrant_api_key: Option<String>,
    /// 目标集合名称
    #[arg(long, env = "COLLECTION_NAME", default_value = "faces")]
    pub collection: String,
    /// 向量库请求超时，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub store_timeout: u64,
}

impl StoreOptions {
    /// 连接向量库，未配置地址或连接失败都是致命错误
    pub async fn connect(&self) -> Result<QdrantStore> {
        let url = self
            .qdrant_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| IndexError::Configuration("必须设置 QDRANT_URL".to_owned()))?;
        QdrantStore::connect(
            url,
            self.qdrant_api_key.as_deref(),
            Duration::from_secs(self.store_timeout),
        )
        .await
    }
}

/// 计算设备
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

/// 人脸模型配置
#[derive(Parser, Debug, Clone)]
pub struct EngineOptions {
    /// 模型文件目录，不存在时会自动下载模型
    #[arg(long, env = "MODEL_DIR", default_value = default_model_dir())]
    pub model_dir: PathBuf,
    /// 推理使用的计算设备
    #[arg(long, env = "COMPUTE_DEVICE", value_enum, default_value_t = Device::Cpu)]
    pub device: Device,
    /// 人脸检测的最低置信度
    #[arg(long, value_name = "SCORE", default_value_t = 0.9)]
    pub score_threshold: f32,
}

/// 流水线配置
#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 图片最大边长，超过则等比缩放
    #[arg(long, env = "MAX_DIM", value_name = "PIXELS", default_value_t = 800)]
    pub max_dim: i32,
    /// 同时处理的图片数量
    #[arg(short = 'j', long, env = "MAX_WORKERS", value_name = "N", default_value_t = 4)]
    pub max_workers: usize,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[tokio::test]
    async fn missing_store_url_is_configuration_error() {
        let opts = StoreOptions {
            qdrant_url: Some("  ".into()),
            qdrant_api_key: None,
            collection: "faces".into(),
            store_timeout: 1,
        };
        let err = opts.connect().await.err().unwrap();
        assert!(matches!(err, IndexError::Configuration(_)));
        assert!(err.is_fatal());
    }
}
