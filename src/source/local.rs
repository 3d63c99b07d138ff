use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;
use regex::Regex;
use tokio::task::spawn_blocking;
use walkdir::WalkDir;

use super::MediaSource;
use crate::error::{IndexError, Result};
use crate::types::MediaRef;

/// 本地目录来源
pub struct LocalSource {
    root: PathBuf,
    regex_suf: Regex,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>, regex_suf: Regex) -> Self {
        Self { root: root.into(), regex_suf }
    }
}

#[async_trait]
impl MediaSource for LocalSource {
    async fn enumerate(&self) -> Result<Vec<MediaRef>> {
        let root = self.root.clone();
        let regex_suf = self.regex_suf.clone();
        spawn_blocking(move || scan_directory(&root, &regex_suf))
            .await
            .map_err(|e| IndexError::Enumeration(e.to_string()))?
    }

    async fn fetch(&self, item: &MediaRef) -> Result<Vec<u8>> {
        tokio::fs::read(&item.source_id)
            .await
            .map_err(|e| IndexError::Fetch(format!("{}: {}", item.source_id, e)))
    }
}

fn scan_directory(root: &Path, regex_suf: &Regex) -> Result<Vec<MediaRef>> {
    info!("开始扫描目录: {}", root.display());
    let root = std::path::absolute(root)
        .and_then(|p| p.canonicalize())
        .map_err(|e| IndexError::Enumeration(format!("{}: {}", root.display(), e)))?;
    if !root.is_dir() {
        return Err(IndexError::Enumeration(format!("不是目录: {}", root.display())));
    }

    let mut items = vec![];
    for entry in WalkDir::new(&root) {
        let entry = entry.map_err(|e| IndexError::Enumeration(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension() else {
            continue;
        };
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        if !regex_suf.is_match(&ext) {
            continue;
        }
        let path = path.to_string_lossy().to_string();
        items.push(MediaRef {
            source_id: path.clone(),
            display_name: entry.file_name().to_string_lossy().to_string(),
            mime_type: format!("image/{}", ext),
            access_link: path,
        });
    }

    info!("扫描完成，共 {} 张图片", items.len());
    Ok(items)
}
