use serde::{Deserialize, Serialize};

/// 一张待处理图片的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// 来源内唯一的 ID，本地来源为绝对路径
    pub source_id: String,
    pub display_name: String,
    pub mime_type: String,
    /// 可供用户打开的链接
    pub access_link: String,
}

impl MediaRef {
    /// 小写的文件后缀名，不含 `.`
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.display_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// 一张人脸的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    pub embedding: Vec<f32>,
    /// `[x1, y1, x2, y2]`，坐标基于缩放后的图片
    pub bbox: Option<[f32; 4]>,
    /// 该人脸在同一张图片中的序号
    pub source_index: usize,
}

/// 写入向量库的点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub owner_id: String,
    pub event_id: String,
    pub file_id: String,
    pub file_name: String,
    pub link: String,
    pub bbox: Option<[f32; 4]>,
}
