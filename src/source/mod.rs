//! 图片来源：枚举图片并下载原始字节

mod auth;
mod drive;
mod local;
#[cfg(test)]
mod mock;

use std::collections::HashSet;

use async_trait::async_trait;

pub use self::auth::*;
pub use self::drive::*;
pub use self::local::*;
use crate::error::Result;
use crate::types::MediaRef;

/// 一个可以枚举并读取图片的来源
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// 递归列出全部图片，失败时不返回部分结果
    async fn enumerate(&self) -> Result<Vec<MediaRef>>;

    /// 读取一张图片的原始字节
    async fn fetch(&self, item: &MediaRef) -> Result<Vec<u8>>;
}

/// 目录中的一个条目
#[derive(Debug, Clone)]
pub enum Child {
    Folder(String),
    Item(MediaRef),
    /// 既不是目录也不是图片
    Other,
}

/// 一页目录列表
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub children: Vec<Child>,
    pub next_page_token: Option<String>,
}

/// 支持分页列出子条目的目录树
#[async_trait]
pub trait FolderListing: Send + Sync {
    async fn list_children(&self, folder: &str, page_token: Option<&str>) -> Result<Page>;
}

/// 从 `root` 开始遍历整个目录树，收集所有图片并按 `source_id` 去重
pub async fn walk_tree<L: FolderListing + ?Sized>(listing: &L, root: &str) -> Result<Vec<MediaRef>> {
    let mut folders = vec![root.to_owned()];
    let mut visited = HashSet::new();
    let mut seen = HashSet::new();
    let mut items = vec![];

    while let Some(folder) = folders.pop() {
        // 同一个目录可能出现在多个父目录下
        if !visited.insert(folder.clone()) {
            continue;
        }
        let mut page_token: Option<String> = None;
        loop {
            let page = listing.list_children(&folder, page_token.as_deref()).await?;
            for child in page.children {
                match child {
                    Child::Folder(id) => folders.push(id),
                    Child::Item(item) => {
                        if seen.insert(item.source_id.clone()) {
                            items.push(item);
                        }
                    }
                    Child::Other => {}
                }
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
    }

    Ok(items)
}
