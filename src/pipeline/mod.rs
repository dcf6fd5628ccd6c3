/// 批量处理流水线 (Batch Processing Pipeline)
///
/// 单线程顺序处理目录中的视频:
/// - predict: 发现 → 推理 (帧索引失败时转码重试一次) → 可选追踪 → 保存
/// - store:   输出目录布局, 预测结果 JSON 读写
pub mod predict;
pub mod store;

pub use predict::{
    skip_repaired_copies, InferOutcome, PredictSummary, PredictionPipeline, SkippedVideo,
};
pub use store::{
    clear_dir_files, load_artifact, save_artifact, OutputLayout, ARTIFACT_EXTENSION,
};
