use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn default_owner_id() -> String {
    "public".to_owned()
}

fn default_event_name() -> String {
    "event".to_owned()
}

/// 索引任务
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobRequest {
    /// Google Drive 目录 ID
    pub drive_folder_id: Option<String>,
    /// 服务器上的本地目录，与 `drive_folder_id` 二选一
    pub local_folder: Option<String>,
    #[serde(default = "default_owner_id")]
    #[schema(default = "public")]
    pub owner_id: String,
    #[serde(default = "default_event_name")]
    #[schema(default = "event")]
    pub event_name: String,
}

/// 任务结果
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    /// 索引进程的退出码
    pub exit_code: i32,
    /// 最后若干行日志
    pub logs: Vec<String>,
    /// 运行清单，不存在时为 `{"status": "manifest not found"}`
    #[schema(value_type = Object)]
    pub manifest: serde_json::Value,
}
