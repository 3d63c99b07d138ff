use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次运行的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub owner_id: String,
    pub event_id: String,
    /// 枚举到的图片数量
    #[serde(alias = "files_found")]
    pub files_indexed: usize,
    pub points_upserted: usize,
    pub started_at: DateTime<Utc>,
    /// 完成时间，Unix 秒
    pub timestamp: f64,
    pub elapsed_secs: f64,
}

impl RunManifest {
    /// 清单文件路径：`<dir>/index_manifest_<owner_id>_<event_id>.json`
    pub fn path(dir: &Path, owner_id: &str, event_id: &str) -> PathBuf {
        dir.join(format!("index_manifest_{}_{}.json", owner_id, event_id))
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path(dir, &self.owner_id, &self.event_id);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
