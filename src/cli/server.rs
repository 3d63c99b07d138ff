use std::path::PathBuf;

use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;

use crate::cli::SubCommandExtend;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, env = "SERVER_TOKEN", default_value_t = String::new())]
    pub token: String,
    /// 运行清单目录
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub manifest_dir: PathBuf,
    /// 响应中返回的日志行数
    #[arg(long, default_value_t = 60)]
    pub log_tail: usize,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let mut token = self.token.clone();
        if token.is_empty() {
            token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
        }

        // 索引任务由当前程序的 index 子命令执行
        let exe = std::env::current_exe()?;
        let state = server::AppState::new(exe, self.manifest_dir.clone(), token, self.log_tail);
        let app = server::create_app(state);

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
