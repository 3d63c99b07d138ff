use std::sync::LazyLock;

use prometheus::*;

static METRIC_ITEM_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "faceindex_item_count",
        "count of the processed images by outcome",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_POINTS_UPSERTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("faceindex_points_upserted", "count of the upserted face points").unwrap()
});

static METRIC_ITEM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "faceindex_item_duration",
        "duration of the per-image processing in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1., 2.5, 5., 10., 30., 60.]
    )
    .unwrap()
});

/// 单张图片的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 写入了至少一个点
    Ok,
    /// 没有检测到人脸
    Empty,
    Failed,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Empty => "empty",
            Outcome::Failed => "failed",
        }
    }
}

/// 记录一张图片的处理结果
pub fn observe_item(outcome: Outcome, points: usize, duration: f32) {
    METRIC_ITEM_COUNT.with_label_values(&[outcome.label()]).inc();
    METRIC_POINTS_UPSERTED.inc_by(points as u64);
    METRIC_ITEM_DURATION.observe(duration as f64);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_items_are_exported() {
        observe_item(Outcome::Ok, 2, 0.1);
        observe_item(Outcome::Failed, 0, 0.2);
        let text = gather_text();
        assert!(text.contains("faceindex_item_count"));
        assert!(text.contains("outcome=\"failed\""));
        assert!(text.contains("faceindex_points_upserted"));
    }
}
