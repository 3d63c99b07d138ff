use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

/// 应用状态
pub struct AppState {
    /// 执行索引任务的可执行文件
    pub exe: PathBuf,
    /// 运行清单目录
    pub manifest_dir: PathBuf,
    /// 鉴权 token
    pub token: String,
    /// 返回的日志行数
    pub log_tail: usize,
    /// 同一时间只运行一个索引任务
    pub running: Mutex<()>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(exe: PathBuf, manifest_dir: PathBuf, token: String, log_tail: usize) -> Arc<Self> {
        Arc::new(AppState { exe, manifest_dir, token, log_tail, running: Mutex::new(()) })
    }
}
