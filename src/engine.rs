//! 人脸检测与特征提取

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use opencv::core::{Mat, Ptr, Size};
use opencv::objdetect::{FaceDetectorYN, FaceRecognizerSF};
use opencv::dnn;
use opencv::prelude::*;
use tokio::sync::OnceCell;
use tokio::task::spawn_blocking;

use crate::config::{Device, EngineOptions};
use crate::decode::DecodedImage;
use crate::error::{IndexError, Result};
use crate::types::FaceRecord;

const DETECTOR_FILE: &str = "face_detection_yunet_2023mar.onnx";
const DETECTOR_URL: &str = "https://github.com/opencv/opencv_zoo/raw/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx";
const RECOGNIZER_FILE: &str = "face_recognition_sface_2021dec.onnx";
const RECOGNIZER_URL: &str = "https://github.com/opencv/opencv_zoo/raw/main/models/face_recognition_sface/face_recognition_sface_2021dec.onnx";

/// 人脸特征提取引擎
///
/// 实现可以在内部串行化推理，调用方不能假设并行推理没有锁。
pub trait EmbeddingEngine: Send + Sync {
    /// 检测图片中的所有人脸，没有人脸时返回空列表
    fn detect(&self, image: &DecodedImage) -> Result<Vec<FaceRecord>>;
}

type EngineFactory = dyn Fn() -> Result<Arc<dyn EmbeddingEngine>> + Send + Sync;

/// 延迟初始化的共享引擎
///
/// 第一个调用者执行初始化，其余调用者等待并复用同一个实例；
/// 初始化失败时所有调用者都得到同一个错误，不会重试也不会挂起。
pub struct EngineCell {
    cell: OnceCell<std::result::Result<Arc<dyn EmbeddingEngine>, String>>,
    factory: Arc<EngineFactory>,
}

impl EngineCell {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingEngine>> + Send + Sync + 'static,
    {
        Self { cell: OnceCell::new(), factory: Arc::new(factory) }
    }

    /// 使用已经创建好的引擎
    pub fn ready(engine: Arc<dyn EmbeddingEngine>) -> Self {
        let factory: Arc<EngineFactory> =
            Arc::new(|| Err(IndexError::Initialization("引擎已初始化".into())));
        Self { cell: OnceCell::new_with(Some(Ok(engine))), factory }
    }

    pub async fn get(&self) -> Result<Arc<dyn EmbeddingEngine>> {
        let slot = self
            .cell
            .get_or_init(|| async {
                let factory = self.factory.clone();
                match spawn_blocking(move || factory()).await {
                    Ok(Ok(engine)) => Ok(engine),
                    Ok(Err(IndexError::Initialization(msg))) => Err(msg),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("初始化任务异常退出: {}", e)),
                }
            })
            .await;
        slot.clone().map_err(IndexError::Initialization)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}

struct Models {
    detector: Ptr<FaceDetectorYN>,
    recognizer: Ptr<FaceRecognizerSF>,
}

// NOTE: 模型只在持有锁时访问
unsafe impl Send for Models {}

/// 基于 OpenCV YuNet + SFace 的引擎
pub struct OpenCvFaceEngine {
    models: Mutex<Models>,
}

impl OpenCvFaceEngine {
    /// 加载模型，本地不存在时先下载
    pub fn load(opts: &EngineOptions) -> Result<Self> {
        info!("正在初始化人脸模型: {}", opts.model_dir.display());
        let detector_path = ensure_model(&opts.model_dir, DETECTOR_FILE, DETECTOR_URL)?;
        let recognizer_path = ensure_model(&opts.model_dir, RECOGNIZER_FILE, RECOGNIZER_URL)?;

        let (backend, target) = match opts.device {
            Device::Cpu => (dnn::Backend::DNN_BACKEND_OPENCV, dnn::Target::DNN_TARGET_CPU),
            Device::Cuda => (dnn::Backend::DNN_BACKEND_CUDA, dnn::Target::DNN_TARGET_CUDA),
        };

        let init_err = |e: opencv::Error| IndexError::Initialization(e.to_string());
        let detector = FaceDetectorYN::create(
            &detector_path.to_string_lossy(),
            "",
            Size::new(320, 320),
            opts.score_threshold,
            0.3,
            5000,
            backend as i32,
            target as i32,
        )
        .map_err(init_err)?;
        let recognizer = FaceRecognizerSF::create(
            &recognizer_path.to_string_lossy(),
            "",
            backend as i32,
            target as i32,
        )
        .map_err(init_err)?;

        info!("人脸模型初始化完成，计算设备: {:?}", opts.device);
        Ok(Self { models: Mutex::new(Models { detector, recognizer }) })
    }

    fn detect_impl(models: &mut Models, image: &Mat) -> opencv::Result<Vec<FaceRecord>> {
        models.detector.set_input_size(Size::new(image.cols(), image.rows()))?;
        let mut faces = Mat::default();
        models.detector.detect(image, &mut faces)?;

        let mut records = vec![];
        for i in 0..faces.rows() {
            let face = faces.row(i)?.try_clone()?;
            let (x, y) = (*faces.at_2d::<f32>(i, 0)?, *faces.at_2d::<f32>(i, 1)?);
            let (w, h) = (*faces.at_2d::<f32>(i, 2)?, *faces.at_2d::<f32>(i, 3)?);

            let mut aligned = Mat::default();
            models.recognizer.align_crop(image, &face, &mut aligned)?;
            let mut feature = Mat::default();
            models.recognizer.feature(&aligned, &mut feature)?;

            records.push(FaceRecord {
                embedding: normalize(feature.data_typed::<f32>()?),
                bbox: Some([x, y, x + w, y + h]),
                source_index: records.len(),
            });
        }
        Ok(records)
    }
}

impl EmbeddingEngine for OpenCvFaceEngine {
    fn detect(&self, image: &DecodedImage) -> Result<Vec<FaceRecord>> {
        let mut models = self
            .models
            .lock()
            .map_err(|_| IndexError::Detection("模型锁已损坏".to_owned()))?;
        Self::detect_impl(&mut models, &image.image)
            .map_err(|e| IndexError::Detection(format!("{}: {}", image.source.display_name, e)))
    }
}

/// L2 归一化
pub fn normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0. {
        return values.to_vec();
    }
    values.iter().map(|v| v / norm).collect()
}

/// 确保模型文件存在，不存在则下载到 `dir`
fn ensure_model(dir: &Path, file: &str, url: &str) -> Result<PathBuf> {
    let path = dir.join(file);
    if path.exists() {
        return Ok(path);
    }
    std::fs::create_dir_all(dir)
        .map_err(|e| IndexError::Initialization(format!("{}: {}", dir.display(), e)))?;

    info!("正在下载模型: {}", url);
    let download = async {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(300)).build()?;
        client.get(url).send().await?.error_for_status()?.bytes().await
    };
    // 初始化运行在 spawn_blocking 线程中，可以直接借用当前运行时
    let data = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.block_on(download),
        Err(_) => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| IndexError::Initialization(e.to_string()))?
            .block_on(download),
    };
    let data = data.map_err(|e| IndexError::Initialization(format!("下载模型失败: {}", e)))?;

    // 写完临时文件再重命名
    let tmp = path.with_extension("onnx.tmp");
    std::fs::write(&tmp, &data)
        .and_then(|_| std::fs::rename(&tmp, &path))
        .map_err(|e| IndexError::Initialization(format!("{}: {}", path.display(), e)))?;
    info!("模型已保存到 {}", path.display());
    Ok(path)
}
