#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行参数
pub mod detection; // 姿态数据与追踪
pub mod error; // 错误类型
pub mod export; // CSV导出
pub mod input; // 视频输入系统
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 批量预测流水线
pub mod tracker_config; // 追踪器参数文件

pub use crate::config::{Args, ResetPolicy};
pub use crate::detection::{BBox, DetectionInstance, Frame, PredictionArtifact, Skeleton};
pub use crate::error::{PipelineError, Result};
pub use crate::export::ResultFlattener;
pub use crate::models::{Predictor, YoloPoseConfig, YoloPosePredictor};
pub use crate::pipeline::{OutputLayout, PredictSummary, PredictionPipeline};
pub use crate::tracker_config::TrackerConfig;

/// 按实例分数降序做 NMS, 外接框 IOU 超过阈值的低分实例被丢弃
pub fn non_max_suppression(xs: &mut Vec<(BBox, DetectionInstance)>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.1.score.total_cmp(&b1.1.score));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
