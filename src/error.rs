use thiserror::Error;

/// 索引过程中的错误
///
/// 分为两类：致命错误会终止整次运行；单项错误只影响当前图片，记录日志后按 0 个点计数。
#[derive(Debug, Error)]
pub enum IndexError {
    /// 配置缺失或无效，在开始任何工作之前报告
    #[error("配置错误: {0}")]
    Configuration(String),
    /// 无法列出来源目录树
    #[error("枚举来源失败: {0}")]
    Enumeration(String),
    /// 一次性初始化失败，所有等待者都会看到同一个错误
    #[error("初始化失败: {0}")]
    Initialization(String),
    #[error("下载失败: {0}")]
    Fetch(String),
    #[error("解码失败: {0}")]
    Decode(String),
    #[error("人脸检测失败: {0}")]
    Detection(String),
    #[error("写入向量库失败: {0}")]
    Write(String),
    /// 向量维度与已创建的集合不一致
    #[error("向量维度不一致: 集合为 {expected}，实际为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl IndexError {
    /// 是否为需要终止运行的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::Configuration(_) | IndexError::Enumeration(_) | IndexError::Initialization(_)
        )
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
