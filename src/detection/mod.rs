/// 检测与追踪 (Detection & Tracking)
///
/// - types:        骨架、实例、帧、预测结果
/// - tracker:      追踪器接口与公共算法 (相似度、贪心匹配、预剔除、断裂连接)
/// - optical_flow: 金字塔LK光流
/// - flow_tracker: 光流辅助追踪器
pub mod flow_tracker;
pub mod optical_flow;
pub mod tracker;
pub mod types;

pub use flow_tracker::{FlowTracker, TrackState};
pub use tracker::{track_sequence, Tracker, TrackerBuilder};
pub use types::{
    BBox, DetectionInstance, Frame, NodePoint, PredictionArtifact, Skeleton, TrackInfo, VideoInfo,
};
