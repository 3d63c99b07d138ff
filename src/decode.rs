//! 多格式图片解码
//!
//! 按格式族分派到不同的解码器，输出统一的 8 位 BGR 三通道图像，并等比缩放到最大边长以内。

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use log::warn;
use opencv::core::{self, Mat, Size};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use crate::types::MediaRef;

/// 相机 RAW 格式的后缀
pub const RAW_EXTENSIONS: &[&str] = &["nef", "cr2", "arw", "raf"];
pub const HEIC_EXTENSIONS: &[&str] = &["heic", "heif"];

/// 图片格式族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatFamily {
    /// OpenCV 可以直接解码的常规格式
    Standard,
    Heic,
    Raw,
}

impl FormatFamily {
    /// 根据文件后缀判断格式族，没有后缀时参考 MIME 类型
    pub fn detect(item: &MediaRef) -> Self {
        let tag = match item.extension() {
            Some(ext) => ext,
            None => item.mime_type.rsplit('/').next().unwrap_or_default().to_ascii_lowercase(),
        };
        if HEIC_EXTENSIONS.contains(&tag.as_str()) {
            FormatFamily::Heic
        } else if RAW_EXTENSIONS.contains(&tag.as_str()) {
            FormatFamily::Raw
        } else {
            FormatFamily::Standard
        }
    }
}

/// 解码后的图片，由处理它的任务独占
pub struct DecodedImage {
    /// BGR 三通道图像
    pub image: Mat,
    pub source: MediaRef,
}

impl DecodedImage {
    pub fn width(&self) -> i32 {
        self.image.cols()
    }

    pub fn height(&self) -> i32 {
        self.image.rows()
    }
}

/// 某一格式族的解码器
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Mat>;
}

/// 格式族到解码器的映射
pub struct DecoderRegistry {
    decoders: HashMap<FormatFamily, Box<dyn ImageDecoder>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(FormatFamily::Standard, StandardDecoder);
        #[cfg(feature = "heic")]
        registry.register(FormatFamily::Heic, HeicDecoder);
        #[cfg(feature = "raw")]
        registry.register(FormatFamily::Raw, RawDecoder);
        registry
    }
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self { decoders: HashMap::new() }
    }

    pub fn register(&mut self, family: FormatFamily, decoder: impl ImageDecoder + 'static) {
        self.decoders.insert(family, Box::new(decoder));
    }

    #[cfg(test)]
    pub fn supports(&self, family: FormatFamily) -> bool {
        self.decoders.contains_key(&family)
    }

    /// 解码并缩放图片
    ///
    /// 任何错误都只记录日志并返回 `None`，损坏或不支持的文件等同于没有人脸。
    pub fn decode(&self, bytes: &[u8], item: &MediaRef, max_dim: i32) -> Option<DecodedImage> {
        let family = FormatFamily::detect(item);
        let Some(decoder) = self.decoders.get(&family) else {
            warn!("不支持的图片格式 {:?}: {}", family, item.display_name);
            return None;
        };
        let image = decoder
            .decode(bytes)
            .and_then(ensure_bgr)
            .and_then(|image| Ok(downscale(image, max_dim)?));
        match image {
            Ok(image) => Some(DecodedImage { image, source: item.clone() }),
            Err(e) => {
                warn!("解码失败 {}: {}", item.display_name, e);
                None
            }
        }
    }
}

/// OpenCV imdecode
pub struct StandardDecoder;

impl ImageDecoder for StandardDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Mat> {
        let mat = Mat::from_slice(bytes)?;
        let image = imgcodecs::imdecode(&mat, imgcodecs::IMREAD_COLOR)?;
        if image.empty() {
            return Err(anyhow!("无法识别的图片数据"));
        }
        Ok(image)
    }
}

#[cfg(feature = "heic")]
pub struct HeicDecoder;

#[cfg(feature = "heic")]
impl ImageDecoder for HeicDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Mat> {
        use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

        let lib_heif = LibHeif::new();
        let ctx = HeifContext::read_from_bytes(bytes)?;
        let handle = ctx.primary_image_handle()?;
        let image = lib_heif.decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)?;
        let planes = image.planes();
        let plane = planes.interleaved.ok_or_else(|| anyhow!("HEIF 图像缺少交错平面"))?;

        // 每行可能有对齐填充，需要逐行复制
        let (width, height) = (plane.width as usize, plane.height as usize);
        let mut rgb = Vec::with_capacity(width * height * 3);
        for row in plane.data.chunks(plane.stride).take(height) {
            rgb.extend_from_slice(&row[..width * 3]);
        }
        rgb_to_bgr(&rgb, width as i32, height as i32)
    }
}

#[cfg(feature = "raw")]
pub struct RawDecoder;

#[cfg(feature = "raw")]
impl RawDecoder {
    /// 去马赛克、白平衡并转换到 sRGB
    pub fn develop(raw: rawloader::RawImage) -> Result<Mat> {
        let mut pipeline = imagepipe::Pipeline::new_from_source(imagepipe::ImageSource::Raw(raw))
            .map_err(|e| anyhow!("RAW 后处理失败: {}", e))?;
        let srgb = pipeline.output_8bit(None).map_err(|e| anyhow!("RAW 后处理失败: {}", e))?;
        rgb_to_bgr(&srgb.data, srgb.width as i32, srgb.height as i32)
    }
}

#[cfg(feature = "raw")]
impl ImageDecoder for RawDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Mat> {
        let raw = rawloader::decode(&mut std::io::Cursor::new(bytes))
            .map_err(|e| anyhow!("RAW 解码失败: {:?}", e))?;
        Self::develop(raw)
    }
}

/// 将紧密排列的 RGB 数据转换为 BGR 图像
pub fn rgb_to_bgr(rgb: &[u8], width: i32, height: i32) -> Result<Mat> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(anyhow!("像素数据长度 {} 与尺寸 {}x{} 不符", rgb.len(), width, height));
    }
    let mut src =
        Mat::new_rows_cols_with_default(height, width, core::CV_8UC3, core::Scalar::all(0.))?;
    src.data_bytes_mut()?.copy_from_slice(rgb);
    let mut dst = Mat::default();
    imgproc::cvt_color_def(&src, &mut dst, imgproc::COLOR_RGB2BGR)?;
    Ok(dst)
}

/// 灰度或带透明通道的图片统一转换为 BGR
fn ensure_bgr(image: Mat) -> Result<Mat> {
    let code = match image.channels() {
        3 => return Ok(image),
        1 => imgproc::COLOR_GRAY2BGR,
        4 => imgproc::COLOR_BGRA2BGR,
        n => return Err(anyhow!("不支持的通道数: {}", n)),
    };
    let mut dst = Mat::default();
    imgproc::cvt_color_def(&image, &mut dst, code)?;
    Ok(dst)
}

/// 等比缩放，使最长边不超过 `max_dim`
pub fn downscale(image: Mat, max_dim: i32) -> opencv::Result<Mat> {
    let longest = image.cols().max(image.rows());
    if max_dim <= 0 || longest <= max_dim {
        return Ok(image);
    }
    let scale = max_dim as f64 / longest as f64;
    let size = Size::new(
        ((image.cols() as f64 * scale) as i32).max(1),
        ((image.rows() as f64 * scale) as i32).max(1),
    );
    let mut output = Mat::default();
    imgproc::resize(&image, &mut output, size, 0., 0., imgproc::INTER_AREA)?;
    Ok(output)
}
